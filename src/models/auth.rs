use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in the JWT access token.
///
/// The tenant fields have been through three generations: the oldest tokens
/// carry none of them, the middle generation added `school_id`, and current
/// tokens add the pre-validated `schema` plus the human `school` code.
/// All fields past `sub`/`role` are optional so tokens from any generation
/// decode; [`ClaimSet`] is the shape the resolver actually consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user UUID
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>, // school code
    pub exp: usize,
    pub iat: usize,
}

/// Tenant-identifying claims, normalized into one shape per credential
/// generation so resolution can match on it instead of probing field
/// presence at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimSet {
    /// Current tokens: schema identifier (written by our own issuer from a
    /// validated value, still re-validated on use) plus school id.
    Schema {
        schema: String,
        school_id: Option<i64>,
    },
    /// Middle-generation tokens: only the numeric school id.
    SchoolId(i64),
    /// Oldest tokens carry no tenant claims at all; resolution falls back
    /// to the principal's registry state.
    Bare,
}

impl Claims {
    pub fn claim_set(&self) -> ClaimSet {
        match (&self.schema, self.school_id) {
            (Some(schema), school_id) => ClaimSet::Schema {
                schema: schema.clone(),
                school_id,
            },
            (None, Some(id)) => ClaimSet::SchoolId(id),
            (None, None) => ClaimSet::Bare,
        }
    }
}

/// Extracted from a validated JWT, available to handlers via extractor.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: String,
    pub claims: ClaimSet,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(school_id: Option<i64>, schema: Option<&str>) -> Claims {
        Claims {
            sub: Uuid::new_v4().to_string(),
            role: "staff".into(),
            school_id,
            schema: schema.map(String::from),
            school: None,
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn current_tokens_normalize_to_schema_shape() {
        let set = claims(Some(7), Some("school_lear_1291")).claim_set();
        assert_eq!(
            set,
            ClaimSet::Schema {
                schema: "school_lear_1291".into(),
                school_id: Some(7)
            }
        );
    }

    #[test]
    fn middle_generation_tokens_normalize_to_school_id() {
        assert_eq!(claims(Some(7), None).claim_set(), ClaimSet::SchoolId(7));
    }

    #[test]
    fn legacy_tokens_normalize_to_bare() {
        assert_eq!(claims(None, None).claim_set(), ClaimSet::Bare);
    }

    #[test]
    fn optional_fields_deserialize_when_absent() {
        let decoded: Claims = serde_json::from_str(
            r#"{"sub":"00000000-0000-0000-0000-000000000000","role":"staff","exp":1,"iat":1}"#,
        )
        .unwrap();
        assert_eq!(decoded.claim_set(), ClaimSet::Bare);
    }
}
