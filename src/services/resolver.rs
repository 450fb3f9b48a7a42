//! Tenant resolution: which school schema is this request entitled to?
//!
//! Resolution walks a fixed precedence chain, first hit wins:
//!
//! 1. schema claim on the credential (validated, then matched to a row)
//! 2. school-id claim on the credential
//! 3. the principal's denormalized `primary_school_id` pointer
//! 4. the principal's primary membership
//! 5. no tenant context (legitimate mid-onboarding state)
//!
//! Credentials issued before the newer claims existed still resolve through
//! the later steps, so old tokens keep working without re-authentication.
//! Whatever step produced the school, the schema is re-validated and its
//! physical existence checked before the context is returned; a registry row
//! pointing at an absent schema fails closed rather than guessing.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::db::registry::TenantDirectory;
use crate::db::schema::SchemaName;
use crate::error::TenantError;
use crate::models::auth::ClaimSet;
use crate::models::tenant::{School, SchoolStatus, TenantContext};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Id(i64),
    Code(String),
}

struct CacheEntry {
    context: TenantContext,
    inserted: Instant,
}

/// Bounded-TTL cache of successful resolutions, keyed by school id and by
/// school code. Explicitly invalidated on school status changes; never
/// invalidated implicitly by unrelated writes. A zero TTL disables serving
/// entirely, which is what the test suite uses.
pub struct TenantCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl TenantCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<TenantContext> {
        let entries = self.entries.read().expect("tenant cache poisoned");
        let entry = entries.get(key)?;
        if entry.inserted.elapsed() < self.ttl {
            Some(entry.context.clone())
        } else {
            None
        }
    }

    fn put(&self, context: &TenantContext) {
        let mut entries = self.entries.write().expect("tenant cache poisoned");
        let now = Instant::now();
        entries.insert(
            CacheKey::Id(context.school_id),
            CacheEntry {
                context: context.clone(),
                inserted: now,
            },
        );
        entries.insert(
            CacheKey::Code(context.code.clone()),
            CacheEntry {
                context: context.clone(),
                inserted: now,
            },
        );
    }

    pub fn invalidate(&self, school_id: i64, code: &str) {
        let mut entries = self.entries.write().expect("tenant cache poisoned");
        entries.remove(&CacheKey::Id(school_id));
        entries.remove(&CacheKey::Code(code.to_string()));
    }
}

pub struct TenantResolver<D> {
    directory: D,
    cache: TenantCache,
}

impl<D: TenantDirectory> TenantResolver<D> {
    pub fn new(directory: D, cache_ttl: Duration) -> Self {
        Self {
            directory,
            cache: TenantCache::new(cache_ttl),
        }
    }

    /// Resolve the school context for an authenticated principal.
    pub async fn resolve(
        &self,
        principal: Uuid,
        claims: &ClaimSet,
    ) -> Result<TenantContext, TenantError> {
        match claims {
            ClaimSet::Schema { schema, school_id } => {
                self.from_schema_claim(schema, *school_id).await
            }
            ClaimSet::SchoolId(id) => self.from_school_id(*id).await,
            ClaimSet::Bare => self.from_principal(principal).await,
        }
    }

    /// Resolve by school code (header-based public lookups, admin tooling).
    pub async fn resolve_code(&self, code: &str) -> Result<TenantContext, TenantError> {
        if let Some(ctx) = self.cache.get(&CacheKey::Code(code.to_string())) {
            return Ok(ctx);
        }
        let school = self
            .directory
            .school_by_code(code)
            .await?
            .ok_or(TenantError::SchoolNotFound)?;
        self.finish(school).await
    }

    /// Drop cached context for a school. Call on any status change.
    pub fn invalidate(&self, school_id: i64, code: &str) {
        self.cache.invalidate(school_id, code);
    }

    async fn from_schema_claim(
        &self,
        claimed: &str,
        school_id: Option<i64>,
    ) -> Result<TenantContext, TenantError> {
        // Claims are written by our own issuer from validated values, but a
        // claim is still just a string until it passes the allow-list.
        let schema = SchemaName::parse(claimed)?;

        // Tokens we issue carry the school id alongside the schema; a cached
        // context under that id serves the request only if its schema agrees
        // with the (validated) claim.
        if let Some(id) = school_id {
            if let Some(ctx) = self.cache.get(&CacheKey::Id(id)) {
                if ctx.schema == schema.as_str() {
                    return Ok(ctx);
                }
            }
        }

        let school = self
            .directory
            .school_by_schema(schema.as_str())
            .await?
            // A well-formed schema claim with no registry row is the same
            // inconsistency as a row without a schema: fail closed.
            .ok_or_else(|| TenantError::SchemaMissing(schema.to_string()))?;
        self.finish(school).await
    }

    async fn from_school_id(&self, id: i64) -> Result<TenantContext, TenantError> {
        if let Some(ctx) = self.cache.get(&CacheKey::Id(id)) {
            return Ok(ctx);
        }
        let school = self
            .directory
            .school_by_id(id)
            .await?
            .ok_or(TenantError::SchoolNotFound)?;
        self.finish(school).await
    }

    async fn from_principal(&self, principal: Uuid) -> Result<TenantContext, TenantError> {
        // Denormalized pointer first; it is a cache of the primary
        // membership and may be stale, so a dangling pointer falls through
        // to the membership query instead of failing the request.
        if let Some(id) = self.directory.primary_school_of(principal).await? {
            if let Some(ctx) = self.cache.get(&CacheKey::Id(id)) {
                return Ok(ctx);
            }
            if let Some(school) = self.directory.school_by_id(id).await? {
                return self.finish(school).await;
            }
            tracing::warn!("principal {principal} has dangling primary_school_id {id}");
        }

        if let Some(membership) = self.directory.primary_membership(principal).await? {
            if let Some(ctx) = self.cache.get(&CacheKey::Id(membership.school_id)) {
                return Ok(ctx);
            }
            let school = self
                .directory
                .school_by_id(membership.school_id)
                .await?
                .ok_or(TenantError::SchoolNotFound)?;
            return self.finish(school).await;
        }

        Err(TenantError::NoTenantContext)
    }

    /// Common tail of every resolution path: lifecycle gate, schema
    /// validation, physical existence check, then cache and return.
    async fn finish(&self, school: School) -> Result<TenantContext, TenantError> {
        if school.status != SchoolStatus::Active {
            return Err(TenantError::SchoolInactive);
        }

        let schema = SchemaName::parse(&school.schema_name)?;
        if !self.directory.schema_exists(schema.as_str()).await? {
            return Err(TenantError::SchemaMissing(schema.to_string()));
        }

        let context = TenantContext {
            school_id: school.id,
            code: school.code,
            schema: schema.as_str().to_string(),
            name: school.name,
        };
        self.cache.put(&context);
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tenant::Membership;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn school(id: i64, code: &str, status: SchoolStatus) -> School {
        School {
            id,
            code: code.to_string(),
            schema_name: format!("school_{code}"),
            name: format!("School {code}"),
            status,
            address: None,
            phone: None,
            email: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeDirectory {
        schools: Vec<School>,
        memberships: Vec<Membership>,
        primary_pointers: Vec<(Uuid, i64)>,
        missing_schemas: Vec<String>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl TenantDirectory for FakeDirectory {
        async fn school_by_id(&self, id: i64) -> Result<Option<School>, TenantError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.schools.iter().find(|s| s.id == id).cloned())
        }

        async fn school_by_code(&self, code: &str) -> Result<Option<School>, TenantError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.schools.iter().find(|s| s.code == code).cloned())
        }

        async fn school_by_schema(&self, schema: &str) -> Result<Option<School>, TenantError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.schools.iter().find(|s| s.schema_name == schema).cloned())
        }

        async fn primary_school_of(&self, user_id: Uuid) -> Result<Option<i64>, TenantError> {
            Ok(self
                .primary_pointers
                .iter()
                .find(|(u, _)| *u == user_id)
                .map(|(_, id)| *id))
        }

        async fn primary_membership(
            &self,
            user_id: Uuid,
        ) -> Result<Option<Membership>, TenantError> {
            Ok(self
                .memberships
                .iter()
                .find(|m| m.user_id == user_id && m.is_primary)
                .cloned())
        }

        async fn schema_exists(&self, schema: &str) -> Result<bool, TenantError> {
            Ok(!self.missing_schemas.iter().any(|s| s == schema))
        }
    }

    fn membership(user: Uuid, school_id: i64) -> Membership {
        Membership {
            user_id: user,
            school_id,
            role: "staff".into(),
            is_primary: true,
        }
    }

    fn resolver(directory: FakeDirectory) -> TenantResolver<FakeDirectory> {
        TenantResolver::new(directory, Duration::ZERO)
    }

    #[tokio::test]
    async fn schema_claim_wins_over_primary_membership() {
        let user = Uuid::new_v4();
        let dir = FakeDirectory {
            schools: vec![
                school(1, "lear_1291", SchoolStatus::Active),
                school(2, "other", SchoolStatus::Active),
            ],
            memberships: vec![membership(user, 2)],
            ..Default::default()
        };
        let ctx = resolver(dir)
            .resolve(
                user,
                &ClaimSet::Schema {
                    schema: "school_lear_1291".into(),
                    school_id: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(ctx.schema, "school_lear_1291");
        assert_eq!(ctx.school_id, 1);
    }

    #[tokio::test]
    async fn bare_claims_fall_back_to_primary_membership() {
        let user = Uuid::new_v4();
        let dir = FakeDirectory {
            schools: vec![school(3, "west_park", SchoolStatus::Active)],
            memberships: vec![membership(user, 3)],
            ..Default::default()
        };
        let ctx = resolver(dir).resolve(user, &ClaimSet::Bare).await.unwrap();
        assert_eq!(ctx.schema, "school_west_park");
        assert_eq!(ctx.name, "School west_park");
    }

    #[tokio::test]
    async fn school_id_claim_resolves_without_memberships() {
        let dir = FakeDirectory {
            schools: vec![school(9, "stmarys", SchoolStatus::Active)],
            ..Default::default()
        };
        let ctx = resolver(dir)
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(9))
            .await
            .unwrap();
        assert_eq!(ctx.code, "stmarys");
    }

    #[tokio::test]
    async fn invalid_schema_claim_is_rejected_not_repaired() {
        let dir = FakeDirectory {
            schools: vec![school(1, "lear_1291", SchoolStatus::Active)],
            ..Default::default()
        };
        let err = resolver(dir)
            .resolve(
                Uuid::new_v4(),
                &ClaimSet::Schema {
                    schema: "school_x; DROP SCHEMA public".into(),
                    school_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::InvalidSchemaName));
    }

    #[tokio::test]
    async fn fails_closed_when_schema_physically_absent() {
        let dir = FakeDirectory {
            schools: vec![school(4, "ghost", SchoolStatus::Active)],
            missing_schemas: vec!["school_ghost".into()],
            ..Default::default()
        };
        let err = resolver(dir)
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(4))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::SchemaMissing(_)));
    }

    #[tokio::test]
    async fn no_memberships_is_no_context_not_an_internal_error() {
        let err = resolver(FakeDirectory::default())
            .resolve(Uuid::new_v4(), &ClaimSet::Bare)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::NoTenantContext));
    }

    #[tokio::test]
    async fn dangling_primary_pointer_falls_through_to_membership() {
        let user = Uuid::new_v4();
        let dir = FakeDirectory {
            schools: vec![school(5, "real", SchoolStatus::Active)],
            // Pointer references a school that no longer exists.
            primary_pointers: vec![(user, 999)],
            memberships: vec![membership(user, 5)],
            ..Default::default()
        };
        let ctx = resolver(dir).resolve(user, &ClaimSet::Bare).await.unwrap();
        assert_eq!(ctx.school_id, 5);
    }

    #[tokio::test]
    async fn suspended_school_is_rejected() {
        let dir = FakeDirectory {
            schools: vec![school(6, "late", SchoolStatus::Suspended)],
            ..Default::default()
        };
        let err = resolver(dir)
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(6))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::SchoolInactive));
    }

    #[tokio::test]
    async fn cache_serves_repeat_resolutions_within_ttl() {
        let dir = FakeDirectory {
            schools: vec![school(7, "cached", SchoolStatus::Active)],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::from_secs(60));
        resolver
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(7))
            .await
            .unwrap();
        resolver
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(7))
            .await
            .unwrap();
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_claim_is_served_from_cache_within_ttl() {
        let dir = FakeDirectory {
            schools: vec![school(1, "lear_1291", SchoolStatus::Active)],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::from_secs(60));
        let claims = ClaimSet::Schema {
            schema: "school_lear_1291".into(),
            school_id: Some(1),
        };
        resolver.resolve(Uuid::new_v4(), &claims).await.unwrap();
        resolver.resolve(Uuid::new_v4(), &claims).await.unwrap();
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_context_with_different_schema_is_not_served() {
        let dir = FakeDirectory {
            schools: vec![
                school(1, "lear_1291", SchoolStatus::Active),
                school(2, "other", SchoolStatus::Active),
            ],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::from_secs(60));
        // Prime the id-keyed cache for school 1.
        resolver
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(1))
            .await
            .unwrap();
        // A claim whose id hint disagrees with its schema must not be
        // answered from the cache entry under that id.
        let ctx = resolver
            .resolve(
                Uuid::new_v4(),
                &ClaimSet::Schema {
                    schema: "school_other".into(),
                    school_id: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(ctx.school_id, 2);
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_disables_the_cache() {
        let dir = FakeDirectory {
            schools: vec![school(7, "cached", SchoolStatus::Active)],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::ZERO);
        for _ in 0..2 {
            resolver
                .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(7))
                .await
                .unwrap();
        }
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_forces_a_fresh_lookup() {
        let dir = FakeDirectory {
            schools: vec![school(8, "flip", SchoolStatus::Active)],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::from_secs(60));
        resolver
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(8))
            .await
            .unwrap();
        resolver.invalidate(8, "flip");
        resolver
            .resolve(Uuid::new_v4(), &ClaimSet::SchoolId(8))
            .await
            .unwrap();
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resolve_code_uses_the_code_keyed_cache() {
        let dir = FakeDirectory {
            schools: vec![school(10, "byname", SchoolStatus::Active)],
            ..Default::default()
        };
        let resolver = TenantResolver::new(dir, Duration::from_secs(60));
        resolver.resolve_code("byname").await.unwrap();
        resolver.resolve_code("byname").await.unwrap();
        assert_eq!(resolver.directory.lookups.load(Ordering::SeqCst), 1);
    }
}
