use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "school_status", rename_all = "snake_case")]
#[serde(rename_all = "lowercase")]
pub enum SchoolStatus {
    Active,
    Inactive,
    Suspended,
}

/// Registry row for one school (tenant). `schema_name` is written once at
/// onboarding and never reassigned; the row is soft-disabled via `status`
/// rather than deleted while tenant data exists.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct School {
    pub id: i64,
    pub code: String,
    pub schema_name: String,
    pub name: String,
    pub status: SchoolStatus,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's association with a school.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub user_id: Uuid,
    pub school_id: i64,
    pub role: String,
    pub is_primary: bool,
}

/// Per-request outcome of tenant resolution. Never persisted; recomputed or
/// served from the resolver cache on every request.
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    pub school_id: i64,
    pub code: String,
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolRequest {
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchoolRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<SchoolStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolAdminRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}
