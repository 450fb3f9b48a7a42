use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::models::auth::{AuthenticatedUser, Claims};

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid Authorization header format"))?;

        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "JWT secret not configured"))?;

        decode_access_token(token, &secret.0)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token"))
    }
}

/// Extension type to carry the JWT secret through request extensions.
#[derive(Clone)]
pub struct JwtSecret(pub String);

pub fn decode_access_token(token: &str, secret: &str) -> anyhow::Result<AuthenticatedUser> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        role: claims.role.clone(),
        claims: claims.claim_set(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::ClaimSet;
    use crate::models::tenant::TenantContext;
    use crate::services::auth::AuthService;
    use uuid::Uuid;

    const SECRET: &str = "test_secret";

    #[test]
    fn round_trips_current_generation_claims() {
        let user_id = Uuid::new_v4();
        let context = TenantContext {
            school_id: 7,
            code: "lear_1291".into(),
            schema: "school_lear_1291".into(),
            name: "Lear Academy".into(),
        };
        let token =
            AuthService::issue_access_token(user_id, "staff", Some(&context), SECRET, 900)
                .unwrap();
        let user = decode_access_token(&token, SECRET).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(
            user.claims,
            ClaimSet::Schema {
                schema: "school_lear_1291".into(),
                school_id: Some(7)
            }
        );
    }

    #[test]
    fn tokens_without_tenant_claims_decode_to_bare() {
        let user_id = Uuid::new_v4();
        let token =
            AuthService::issue_access_token(user_id, "staff", None, SECRET, 900).unwrap();
        let user = decode_access_token(&token, SECRET).unwrap();
        assert_eq!(user.claims, ClaimSet::Bare);
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let token =
            AuthService::issue_access_token(Uuid::new_v4(), "staff", None, "other", 900).unwrap();
        assert!(decode_access_token(&token, SECRET).is_err());
    }
}
