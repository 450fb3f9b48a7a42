use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::TenantError;
use crate::models::auth::{ClaimSet, LoginRequest};
use crate::services::auth::AuthService;
use crate::AppState;

/// Login against the registry. The issued token carries the current-shape
/// tenant claims when the user resolves to a school; users mid-onboarding
/// get a bare token and resolve later through the fallback chain.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, Response> {
    let user = AuthService::verify_credentials(&state.db, &body.email, &body.password)
        .await
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid credentials" })),
            )
                .into_response()
        })?;

    let context = match state.resolver.resolve(user.id, &ClaimSet::Bare).await {
        Ok(ctx) => Some(ctx),
        Err(TenantError::NoTenantContext) => None,
        Err(e) => return Err(e.into_response()),
    };

    let token = AuthService::issue_access_token(
        user.id,
        &user.role,
        context.as_ref(),
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .map_err(|e| {
        tracing::error!("token issuance failed: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Could not issue token" })),
        )
            .into_response()
    })?;

    Ok(Json(json!({
        "access_token": token,
        "user": {
            "id": user.id,
            "email": user.email,
            "first_name": user.first_name,
            "last_name": user.last_name,
            "role": user.role,
        },
        "school": context,
    })))
}
