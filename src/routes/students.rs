use axum::{extract::State, Json};

use crate::db;
use crate::db::schema::SchemaName;
use crate::error::TenantError;
use crate::models::auth::AuthenticatedUser;
use crate::models::student::{CreateStudentRequest, Student};
use crate::AppState;

/// Tenant-scoped read: resolve the caller's school, then query its schema.
/// The schema identifier is the only thing spliced into the statement text;
/// everything else is a bound parameter.
pub async fn list_students(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Student>>, TenantError> {
    let context = state.resolver.resolve(user.user_id, &user.claims).await?;
    let schema = SchemaName::parse(&context.schema)?;

    let sql = db::scoped_sql(
        &schema,
        "SELECT id, first_name, last_name, year_group, form_class, is_active,
                created_at, updated_at
           FROM {schema}.students
          WHERE is_active = TRUE
          ORDER BY last_name, first_name",
    )?;
    let students = db::with_retry(|| {
        sqlx::query_as::<_, Student>(&sql).fetch_all(&state.db)
    })
    .await?;

    Ok(Json(students))
}

pub async fn create_student(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateStudentRequest>,
) -> Result<Json<Student>, TenantError> {
    let context = state.resolver.resolve(user.user_id, &user.claims).await?;
    let schema = SchemaName::parse(&context.schema)?;

    let sql = db::scoped_sql(
        &schema,
        "INSERT INTO {schema}.students (first_name, last_name, year_group, form_class)
         VALUES ($1, $2, $3, $4)
         RETURNING id, first_name, last_name, year_group, form_class, is_active,
                   created_at, updated_at",
    )?;
    let student = db::with_retry(|| {
        sqlx::query_as::<_, Student>(&sql)
            .bind(&body.first_name)
            .bind(&body.last_name)
            .bind(&body.year_group)
            .bind(&body.form_class)
            .fetch_one(&state.db)
    })
    .await?;

    Ok(Json(student))
}
