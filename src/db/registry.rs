//! Tenant registry: school and membership lookups over the `public` schema.
//!
//! The resolver talks to the registry through [`TenantDirectory`] so its
//! precedence chain can be tested against an in-memory directory. Note the
//! split between the registry row and the physical schema: `schema_exists`
//! asks the catalog (`pg_namespace`), not the `schools` table, and the two
//! disagreeing is an inconsistency the resolver fails closed on.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::TenantError;
use crate::models::tenant::{Membership, School};

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn school_by_id(&self, id: i64) -> Result<Option<School>, TenantError>;
    async fn school_by_code(&self, code: &str) -> Result<Option<School>, TenantError>;
    async fn school_by_schema(&self, schema: &str) -> Result<Option<School>, TenantError>;
    /// The principal's denormalized primary-school pointer. A convenience
    /// cache of the primary membership; may be stale or null.
    async fn primary_school_of(&self, user_id: Uuid) -> Result<Option<i64>, TenantError>;
    async fn primary_membership(&self, user_id: Uuid) -> Result<Option<Membership>, TenantError>;
    /// Physical existence of the schema in the database catalog. This, not
    /// the registry row, decides whether queries may be issued against it.
    async fn schema_exists(&self, schema: &str) -> Result<bool, TenantError>;
}

/// Production directory backed by the shared pool.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SCHOOL_COLUMNS: &str =
    "id, code, schema_name, name, status, address, phone, email, created_at, updated_at";

#[async_trait]
impl TenantDirectory for PgDirectory {
    async fn school_by_id(&self, id: i64) -> Result<Option<School>, TenantError> {
        let school = sqlx::query_as::<_, School>(&format!(
            "SELECT {SCHOOL_COLUMNS} FROM public.schools WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(school)
    }

    async fn school_by_code(&self, code: &str) -> Result<Option<School>, TenantError> {
        let school = sqlx::query_as::<_, School>(&format!(
            "SELECT {SCHOOL_COLUMNS} FROM public.schools WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(school)
    }

    async fn school_by_schema(&self, schema: &str) -> Result<Option<School>, TenantError> {
        let school = sqlx::query_as::<_, School>(&format!(
            "SELECT {SCHOOL_COLUMNS} FROM public.schools WHERE schema_name = $1"
        ))
        .bind(schema)
        .fetch_optional(&self.pool)
        .await?;
        Ok(school)
    }

    async fn primary_school_of(&self, user_id: Uuid) -> Result<Option<i64>, TenantError> {
        let id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT primary_school_id FROM public.users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.flatten())
    }

    async fn primary_membership(&self, user_id: Uuid) -> Result<Option<Membership>, TenantError> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT user_id, school_id, role, is_primary
               FROM public.school_memberships
              WHERE user_id = $1 AND is_primary = TRUE",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, TenantError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)")
                .bind(schema)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
