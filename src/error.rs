use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// Error taxonomy for tenant resolution and namespace-qualified access.
///
/// The `IntoResponse` impl is the only place these are turned into HTTP
/// bodies; raw schema identifiers and registry internals never reach the
/// client.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    /// Candidate schema identifier failed the allow-list. Fatal to the
    /// operation, never retried, never auto-corrected.
    #[error("invalid schema identifier")]
    InvalidSchemaName,

    /// The principal has no resolvable tenant (no claims, no primary
    /// pointer, no primary membership). Legitimate mid-onboarding state,
    /// distinct from an internal failure.
    #[error("no school context for principal")]
    NoTenantContext,

    /// Registry lookup came back empty for an id/code the caller supplied.
    #[error("school not found")]
    SchoolNotFound,

    /// Registry and physical catalog disagree: the row's schema name is
    /// well-formed but the schema does not exist (or a claimed schema has
    /// no registry row). Fail closed; remediation is administrative.
    #[error("school schema missing for {0}")]
    SchemaMissing(String),

    /// School exists but is not `active`.
    #[error("school is not active")]
    SchoolInactive,

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl TenantError {
    fn status(&self) -> StatusCode {
        match self {
            TenantError::InvalidSchemaName => StatusCode::BAD_REQUEST,
            TenantError::NoTenantContext => StatusCode::CONFLICT,
            TenantError::SchoolNotFound => StatusCode::NOT_FOUND,
            TenantError::SchemaMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            TenantError::SchoolInactive => StatusCode::FORBIDDEN,
            TenantError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Deliberately detail-free: the offending
    /// identifier and any registry state stay in the server logs.
    fn public_message(&self) -> &'static str {
        match self {
            TenantError::InvalidSchemaName => "Invalid school identifier",
            TenantError::NoTenantContext => "No school associated with this account",
            TenantError::SchoolNotFound => "School not found",
            TenantError::SchemaMissing(_) => "School data is unavailable, contact support",
            TenantError::SchoolInactive => "School account is inactive",
            TenantError::Store(_) => "Database error",
        }
    }
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        match &self {
            TenantError::SchemaMissing(schema) => {
                tracing::error!("registry/catalog inconsistency: schema {schema} unreachable");
            }
            TenantError::Store(e) => {
                tracing::error!("store error: {e}");
            }
            _ => {}
        }
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_context_is_distinguishable_from_internal_errors() {
        assert_ne!(
            TenantError::NoTenantContext.status(),
            TenantError::Store(sqlx::Error::PoolClosed).status()
        );
    }

    #[test]
    fn public_messages_never_echo_the_identifier() {
        let err = TenantError::SchemaMissing("school_lear_1291".into());
        assert!(!err.public_message().contains("school_lear_1291"));
    }
}
