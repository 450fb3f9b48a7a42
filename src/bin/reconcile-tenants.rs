/// Reconcile school schemas against the current template.
/// Run after deploys or on a schedule (e.g. cron: 0 3 * * * /app/reconcile-tenants)
///
/// Usage: reconcile-tenants [--school CODE]
///   --school CODE : reconcile only this school (all active if not specified)

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use classrail_api::db::provision;
use classrail_api::db::schema::SchemaName;

#[derive(Parser)]
#[command(name = "reconcile-tenants", about = "Repair drift between school schemas and the template")]
struct Args {
    /// School code to reconcile (optional, all active if not specified)
    #[arg(long)]
    school: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable not set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let codes: Vec<String> = match args.school {
        Some(code) => vec![code],
        None => {
            sqlx::query_scalar("SELECT code FROM public.schools WHERE status = 'active'")
                .fetch_all(&pool)
                .await?
        }
    };

    tracing::info!("Reconciling {} school(s)", codes.len());

    let mut failures = 0usize;
    for code in codes {
        let report = match provision::provision(&pool, &code).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("provision failed for {code}: {e}");
                failures += 1;
                continue;
            }
        };
        let schema: SchemaName = report.schema;
        match provision::reconcile(&pool, &schema).await {
            Ok(report) if report.is_clean() => {
                tracing::info!("{schema}: clean");
            }
            Ok(report) => {
                tracing::info!(
                    "{schema}: +{} tables, +{} columns, {} failures",
                    report.tables_added.len(),
                    report.columns_added.len(),
                    report.failures.len()
                );
                for failure in &report.failures {
                    tracing::warn!("{schema}: {failure}");
                }
                failures += report.failures.len();
            }
            Err(e) => {
                tracing::error!("reconcile failed for {schema}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        tracing::warn!("Completed with {failures} failure(s)");
        std::process::exit(1);
    }
    tracing::info!("All schools reconciled");
    Ok(())
}
