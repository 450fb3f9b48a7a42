use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::error::TenantError;
use crate::models::auth::AuthenticatedUser;
use crate::models::tenant::TenantContext;
use crate::AppState;

/// The school context the resolver computed for the caller: id, code,
/// schema and display name. This is what every tenant-scoped handler runs
/// through before touching the database.
pub async fn get_context(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<TenantContext>, TenantError> {
    let context = state.resolver.resolve(user.user_id, &user.claims).await?;
    Ok(Json(context))
}

/// Public school lookup by the `X-School` header (login screens show the
/// school name before any credential exists). Only display fields leave.
pub async fn get_school_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let code = headers
        .get("X-School")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing X-School header" })),
        ))?;

    match state.resolver.resolve_code(&code).await {
        Ok(ctx) => Ok(Json(json!({ "name": ctx.name, "code": ctx.code }))),
        Err(TenantError::SchoolNotFound) | Err(TenantError::InvalidSchemaName) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "School not found" })),
        )),
        Err(e) => {
            use axum::response::IntoResponse;
            let status = e.into_response().status();
            Err((status, Json(json!({ "error": "School unavailable" }))))
        }
    }
}
