pub mod provision;
pub mod registry;
pub mod schema;
pub mod template;

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::TenantError;
use self::schema::SchemaName;

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the public-schema migrations embedded in ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Re-provision and reconcile every active school (idempotent, safe on every
/// startup). One broken tenant must not keep the rest of the fleet down, so
/// failures are logged and the loop continues.
pub async fn reprovision_all_active(pool: &PgPool) -> anyhow::Result<()> {
    let codes: Vec<String> =
        sqlx::query_scalar("SELECT code FROM public.schools WHERE status = 'active'")
            .fetch_all(pool)
            .await?;

    for code in codes {
        match provision::provision(pool, &code).await {
            Ok(report) => {
                if let Err(e) = provision::reconcile(pool, &report.schema).await {
                    tracing::error!("reconcile failed for {code}: {e}");
                }
            }
            Err(e) => tracing::error!("provision failed for {code}: {e}"),
        }
    }
    Ok(())
}

/// Attempts per statement: the first try plus bounded retries on transient
/// pool/IO failures. Anything else (SQL errors, constraint violations)
/// surfaces immediately.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Substitutes the schema into the `{schema}` qualification positions of a
/// statement template. The schema re-validates even though [`SchemaName`]
/// can only be built through validation; this is the last stop before the
/// identifier lands in statement text. Every other value must be bound as
/// an ordinary parameter by the caller.
///
/// Tenant-scoped handlers pair this with [`with_retry`]:
///
/// ```ignore
/// let sql = db::scoped_sql(&schema, "SELECT * FROM {schema}.students WHERE id = $1")?;
/// let row = db::with_retry(|| sqlx::query_as::<_, Student>(&sql).bind(id).fetch_one(&pool)).await?;
/// ```
pub fn scoped_sql(schema: &SchemaName, template: &str) -> Result<String, TenantError> {
    if !SchemaName::is_valid(schema.as_str()) {
        return Err(TenantError::InvalidSchemaName);
    }
    Ok(template.replace("{schema}", schema.as_str()))
}

/// Run a store operation with a bounded retry on transient pool/IO errors.
/// The closure is re-invoked per attempt, so it must rebuild its query.
pub async fn with_retry<T, F, Fut>(op: F) -> Result<T, TenantError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                tracing::warn!("transient store error (attempt {attempt}): {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn scoped_sql_fills_every_qualification_site() {
        let schema = SchemaName::parse("school_lear_1291").unwrap();
        let sql = scoped_sql(
            &schema,
            "SELECT * FROM {schema}.incidents i JOIN {schema}.students s ON s.id = i.student_id",
        )
        .unwrap();
        assert!(!sql.contains("{schema}"));
        assert_eq!(sql.matches("school_lear_1291").count(), 2);
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
