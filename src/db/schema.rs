use std::fmt;

use crate::error::TenantError;

/// Fixed prefix every tenant schema carries. The prefix keeps tenant schemas
/// visually and lexically apart from `public` and from PostgreSQL's own
/// `pg_*` / `information_schema` namespaces.
pub const SCHEMA_PREFIX: &str = "school_";

/// PostgreSQL truncates identifiers beyond 63 bytes; a truncated schema name
/// would silently alias another tenant, so anything longer is rejected.
pub const MAX_SCHEMA_LEN: usize = 63;

/// A validated tenant schema identifier.
///
/// Schema names cannot be bound as query parameters and have to be spliced
/// into statement text, so this newtype is the single gate in front of every
/// `format!`-built statement: it can only be constructed through [`parse`]
/// (or [`for_code`]), which enforce a closed character class. Anything read
/// from a JWT claim, the registry, or user input is untrusted until it has
/// been through here.
///
/// [`parse`]: SchemaName::parse
/// [`for_code`]: SchemaName::for_code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaName(String);

impl SchemaName {
    /// Validates a candidate schema identifier against the allow-list:
    /// mandatory `school_` prefix, lowercase ASCII letters, digits and
    /// underscores only, at most 63 bytes. Pure; rejection has no side
    /// effects and is never "repaired" by escaping.
    pub fn parse(candidate: &str) -> Result<Self, TenantError> {
        if Self::is_valid(candidate) {
            Ok(SchemaName(candidate.to_string()))
        } else {
            Err(TenantError::InvalidSchemaName)
        }
    }

    /// Derives the schema identifier for a school code and validates it.
    /// `"lear_1291"` → `"school_lear_1291"`. Codes with hyphens (human
    /// convention) map to underscores; anything else that survives
    /// derivation but fails the allow-list is rejected, not sanitized.
    pub fn for_code(code: &str) -> Result<Self, TenantError> {
        let candidate = format!(
            "{SCHEMA_PREFIX}{}",
            code.to_lowercase().replace('-', "_")
        );
        Self::parse(&candidate)
    }

    pub fn is_valid(s: &str) -> bool {
        s.len() <= MAX_SCHEMA_LEN
            && s.len() > SCHEMA_PREFIX.len()
            && s.starts_with(SCHEMA_PREFIX)
            && s.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_schema_from_code() {
        let schema = SchemaName::for_code("lear_1291").unwrap();
        assert_eq!(schema.as_str(), "school_lear_1291");
    }

    #[test]
    fn derivation_maps_hyphens_and_case() {
        let schema = SchemaName::for_code("North-Hill").unwrap();
        assert_eq!(schema.as_str(), "school_north_hill");
    }

    #[test]
    fn rejects_injection_attempts() {
        for bad in [
            "school_x; DROP SCHEMA public CASCADE",
            "school_x'--",
            "school_x\"",
            "school_x.users",
            "school_x OR 1=1",
        ] {
            assert!(SchemaName::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_bad_codes_before_any_ddl() {
        assert!(SchemaName::for_code("bad code!").is_err());
        assert!(SchemaName::for_code("").is_err());
    }

    #[test]
    fn rejects_missing_prefix_and_uppercase() {
        assert!(SchemaName::parse("public").is_err());
        assert!(SchemaName::parse("academy_x").is_err());
        assert!(SchemaName::parse("school_LEAR").is_err());
        assert!(SchemaName::parse("school_").is_err());
    }

    #[test]
    fn rejects_over_length() {
        let long = format!("school_{}", "a".repeat(60));
        assert!(long.len() > MAX_SCHEMA_LEN);
        assert!(SchemaName::parse(&long).is_err());
    }

    #[test]
    fn accepts_all_well_formed_codes() {
        for code in ["lear_1291", "a1", "west_park_22", "stmarys"] {
            let schema = SchemaName::for_code(code).unwrap();
            assert!(SchemaName::is_valid(schema.as_str()));
        }
    }
}
