use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::auth::Claims;
use crate::models::tenant::{CreateSchoolAdminRequest, TenantContext};
use crate::models::user::User;

pub struct AuthService;

impl AuthService {
    /// Issue an HS256 access token. When a resolved context is available
    /// the token carries the full current-generation claims (school id,
    /// validated schema, code); without one it degrades to bare claims and
    /// the resolver's fallback chain takes over on the next request.
    pub fn issue_access_token(
        user_id: Uuid,
        role: &str,
        context: Option<&TenantContext>,
        secret: &str,
        ttl_secs: u64,
    ) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            school_id: context.map(|c| c.school_id),
            schema: context.map(|c| c.schema.clone()),
            school: context.map(|c| c.code.clone()),
            exp: now + ttl_secs as usize,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Verify email/password against the registry. Lookup and verification
    /// failures collapse into the same error so the response does not leak
    /// which of the two was wrong.
    pub async fn verify_credentials(
        pool: &PgPool,
        email: &str,
        password: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, first_name, last_name, role,
                    primary_school_id, is_active, created_at, updated_at
               FROM public.users
              WHERE email = $1 AND is_active = TRUE",
        )
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Invalid credentials"))?;

        let valid = bcrypt::verify(password, &user.password_hash)
            .map_err(|_| anyhow::anyhow!("Invalid credentials"))?;
        if !valid {
            anyhow::bail!("Invalid credentials");
        }
        Ok(user)
    }

    /// Create the initial admin account for a school: user row, primary
    /// membership and the denormalized pointer, in one transaction.
    pub async fn create_school_admin(
        pool: &PgPool,
        school_id: i64,
        body: &CreateSchoolAdminRequest,
    ) -> anyhow::Result<Uuid> {
        let password_hash = bcrypt::hash(&body.password, 12)?;

        let mut tx = pool.begin().await?;

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO public.users
                (email, password_hash, first_name, last_name, role, primary_school_id)
             VALUES ($1, $2, $3, $4, 'school_admin', $5)
             RETURNING id",
        )
        .bind(&body.email)
        .bind(&password_hash)
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(school_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO public.school_memberships (user_id, school_id, role, is_primary)
             VALUES ($1, $2, 'school_admin', TRUE)",
        )
        .bind(user_id)
        .bind(school_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(user_id)
    }
}
