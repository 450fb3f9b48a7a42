use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::db::provision::{provision, reconcile};
use crate::db::schema::SchemaName;
use crate::middleware::super_admin::SuperAdminAuth;
use crate::models::tenant::{
    CreateSchoolAdminRequest, CreateSchoolRequest, School, UpdateSchoolRequest,
};
use crate::services::auth::AuthService;
use crate::AppState;

type ApiError = (StatusCode, Json<Value>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

pub async fn list_schools(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
) -> Result<Json<Vec<School>>, ApiError> {
    sqlx::query_as::<_, School>("SELECT * FROM public.schools ORDER BY name")
        .fetch_all(&state.db)
        .await
        .map(Json)
        .map_err(internal)
}

/// Onboard a school: the registry row goes in as `inactive`, the schema is
/// provisioned, and only after provisioning succeeds does the row flip to
/// `active`. A failed provision leaves an inactive row no request can
/// resolve to, safe to retry via the provision route.
pub async fn create_school(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateSchoolRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Reject bad codes before any row or DDL exists.
    let schema = SchemaName::for_code(&body.code).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid school code" })),
        )
    })?;

    let school = sqlx::query_as::<_, School>(
        "INSERT INTO public.schools (code, schema_name, name, address, phone, email, status)
         VALUES ($1, $2, $3, $4, $5, $6, 'inactive')
         RETURNING *",
    )
    .bind(&body.code)
    .bind(schema.as_str())
    .bind(&body.name)
    .bind(&body.address)
    .bind(&body.phone)
    .bind(&body.email)
    .fetch_one(&state.db)
    .await
    .map_err(internal)?;

    let report = provision(&state.db, &body.code).await.map_err(|e| {
        // Operator-facing detail; the row stays inactive for retry.
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Schema provisioning failed: {e}") })),
        )
    })?;

    sqlx::query("UPDATE public.schools SET status = 'active', updated_at = NOW() WHERE id = $1")
        .bind(school.id)
        .execute(&state.db)
        .await
        .map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "school": school,
            "schema": report.schema.as_str(),
            "tables_created": report.tables_created,
        })),
    ))
}

pub async fn update_school(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(code): Path<String>,
    Json(body): Json<UpdateSchoolRequest>,
) -> Result<Json<School>, ApiError> {
    let school = sqlx::query_as::<_, School>(
        "UPDATE public.schools SET
           name    = COALESCE($2, name),
           address = COALESCE($3, address),
           phone   = COALESCE($4, phone),
           email   = COALESCE($5, email),
           status  = COALESCE($6, status),
           updated_at = NOW()
         WHERE code = $1
         RETURNING *",
    )
    .bind(&code)
    .bind(&body.name)
    .bind(&body.address)
    .bind(&body.phone)
    .bind(&body.email)
    .bind(body.status)
    .fetch_optional(&state.db)
    .await
    .map_err(internal)?
    .ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "School not found" })),
    ))?;

    // Status changes must be visible immediately, not after TTL expiry.
    if body.status.is_some() {
        state.resolver.invalidate(school.id, &school.code);
    }

    Ok(Json(school))
}

/// Re-run provisioning for an existing school (repair path; idempotent).
pub async fn reprovision_school(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = provision(&state.db, &code).await.map_err(internal)?;
    Ok(Json(json!({
        "schema": report.schema.as_str(),
        "tables_created": report.tables_created,
    })))
}

/// Diff a school's schema against the template and repair drift.
pub async fn reconcile_school(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let schema_name: Option<String> =
        sqlx::query_scalar("SELECT schema_name FROM public.schools WHERE code = $1")
            .bind(&code)
            .fetch_optional(&state.db)
            .await
            .map_err(internal)?;
    let schema_name = schema_name.ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "School not found" })),
    ))?;

    let schema = SchemaName::parse(&schema_name).map_err(internal)?;
    let report = reconcile(&state.db, &schema).await.map_err(internal)?;

    Ok(Json(json!({
        "schema": schema.as_str(),
        "tables_added": report.tables_added,
        "columns_added": report.columns_added,
        "failures": report.failures,
        "clean": report.is_clean(),
    })))
}

/// Create the initial admin account for a school.
pub async fn create_school_admin(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(code): Path<String>,
    Json(body): Json<CreateSchoolAdminRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let school_id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM public.schools WHERE code = $1")
            .bind(&code)
            .fetch_optional(&state.db)
            .await
            .map_err(internal)?;
    let school_id = school_id.ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "School not found" })),
    ))?;

    let user_id = AuthService::create_school_admin(&state.db, school_id, &body)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": user_id, "email": body.email })),
    ))
}
