//! Schema provisioning and drift repair for school tenants.
//!
//! `provision` is the onboarding entry point: it derives and validates the
//! schema name, then creates the schema and every template table that is
//! absent. Safe to call any number of times; a re-run after success reports
//! zero tables created. `reconcile` repairs existing schemas that were
//! provisioned from an older template: missing tables are created, missing
//! columns added (with best-effort backfill of denormalized fields), and
//! individual failures are collected rather than aborting the run.

use std::collections::{HashMap, HashSet};

use sqlx::{PgPool, Row};

use crate::db::schema::SchemaName;
use crate::db::template::{ColumnDef, TableDef, SCHOOL_TEMPLATE};
use crate::error::TenantError;

#[derive(Debug)]
pub struct ProvisionReport {
    pub schema: SchemaName,
    pub tables_created: usize,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Tables created because the template defines them and the schema
    /// lacked them entirely.
    pub tables_added: Vec<String>,
    /// `table.column` entries added to existing tables.
    pub columns_added: Vec<String>,
    /// Repairs that failed, as `target: error` strings for the operator.
    pub failures: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.tables_added.is_empty() && self.columns_added.is_empty() && self.failures.is_empty()
    }
}

/// Creates the schema for `code` and all template tables that do not exist
/// yet. Serialized per schema with an advisory lock so two racing onboarding
/// requests converge without interleaved partial work. The lock is session
/// scoped, so it lives on a dedicated connection held for the duration; the
/// DDL itself runs on the pool (every statement is `IF NOT EXISTS`).
pub async fn provision(pool: &PgPool, code: &str) -> Result<ProvisionReport, TenantError> {
    let schema = SchemaName::for_code(code)?;

    let mut lock = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
        .bind(schema.as_str())
        .execute(&mut *lock)
        .await?;

    let result = provision_locked(pool, &schema).await;

    // Best-effort unlock; the lock dies with the session anyway.
    let _ = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
        .bind(schema.as_str())
        .execute(&mut *lock)
        .await;

    result
}

async fn provision_locked(
    pool: &PgPool,
    schema: &SchemaName,
) -> Result<ProvisionReport, TenantError> {
    sqlx::raw_sql(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
        .execute(pool)
        .await?;

    let existing = existing_tables(pool, schema).await?;
    let missing = missing_tables(&existing);
    let tables_created = missing.len();

    for table in missing {
        sqlx::raw_sql(&table.create_sql(schema.as_str()))
            .execute(pool)
            .await?;
        tracing::info!("created {schema}.{}", table.name);
    }

    // Indexes are IF NOT EXISTS and cheap to re-issue for every table.
    for table in SCHOOL_TEMPLATE {
        for index in table.indexes {
            sqlx::raw_sql(&index.replace("{schema}", schema.as_str()))
                .execute(pool)
                .await?;
        }
    }

    tracing::info!("provisioned schema {schema} ({tables_created} tables created)");
    Ok(ProvisionReport {
        schema: schema.clone(),
        tables_created,
    })
}

/// Diffs the live schema against the template and repairs what is missing.
/// One failed repair never aborts the rest: this runs repeatedly (startup,
/// cron, operator-triggered) and is expected to converge over reruns.
pub async fn reconcile(pool: &PgPool, schema: &SchemaName) -> Result<ReconcileReport, TenantError> {
    let live = live_columns(pool, schema).await?;
    let mut report = ReconcileReport::default();

    for table in SCHOOL_TEMPLATE {
        match live.get(table.name) {
            None => {
                match sqlx::raw_sql(&table.create_sql(schema.as_str()))
                    .execute(pool)
                    .await
                {
                    Ok(_) => {
                        tracing::warn!("drift: created missing table {schema}.{}", table.name);
                        report.tables_added.push(table.name.to_string());
                    }
                    Err(e) => report.failures.push(format!("{}: {e}", table.name)),
                }
            }
            Some(cols) => {
                for column in missing_columns(table, cols) {
                    add_column(pool, schema, table, column, &mut report).await;
                }
            }
        }
    }

    for table in SCHOOL_TEMPLATE {
        for index in table.indexes {
            if let Err(e) = sqlx::raw_sql(&index.replace("{schema}", schema.as_str()))
                .execute(pool)
                .await
            {
                report.failures.push(format!("{} index: {e}", table.name));
            }
        }
    }

    if !report.is_clean() {
        tracing::warn!(
            "reconciled {schema}: {} tables, {} columns added, {} failures",
            report.tables_added.len(),
            report.columns_added.len(),
            report.failures.len()
        );
    }
    Ok(report)
}

async fn add_column(
    pool: &PgPool,
    schema: &SchemaName,
    table: &TableDef,
    column: &ColumnDef,
    report: &mut ReconcileReport,
) {
    let stmt = format!(
        "ALTER TABLE \"{schema}\".{} ADD COLUMN IF NOT EXISTS {} {}",
        table.name,
        column.name,
        column.ddl.replace("{schema}", schema.as_str())
    );
    if let Err(e) = sqlx::raw_sql(&stmt).execute(pool).await {
        report.failures.push(format!("{}.{}: {e}", table.name, column.name));
        return;
    }
    tracing::warn!("drift: added column {schema}.{}.{}", table.name, column.name);
    report
        .columns_added
        .push(format!("{}.{}", table.name, column.name));

    if let Some(backfill) = column.backfill {
        if let Err(e) = sqlx::raw_sql(&backfill.replace("{schema}", schema.as_str()))
            .execute(pool)
            .await
        {
            // The column exists either way; backfill is a convenience.
            tracing::warn!(
                "backfill of {schema}.{}.{} failed: {e}",
                table.name,
                column.name
            );
            report
                .failures
                .push(format!("{}.{} backfill: {e}", table.name, column.name));
        }
    }
}

async fn existing_tables(
    pool: &PgPool,
    schema: &SchemaName,
) -> Result<HashSet<String>, TenantError> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = $1",
    )
    .bind(schema.as_str())
    .fetch_all(pool)
    .await?;
    Ok(names.into_iter().collect())
}

async fn live_columns(
    pool: &PgPool,
    schema: &SchemaName,
) -> Result<HashMap<String, HashSet<String>>, TenantError> {
    let rows = sqlx::query(
        "SELECT table_name, column_name
           FROM information_schema.columns
          WHERE table_schema = $1",
    )
    .bind(schema.as_str())
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<String, HashSet<String>> = HashMap::new();
    for row in rows {
        map.entry(row.get("table_name"))
            .or_default()
            .insert(row.get("column_name"));
    }
    Ok(map)
}

fn missing_tables(existing: &HashSet<String>) -> Vec<&'static TableDef> {
    SCHOOL_TEMPLATE
        .iter()
        .filter(|t| !existing.contains(t.name))
        .collect()
}

fn missing_columns<'t>(table: &'t TableDef, existing: &HashSet<String>) -> Vec<&'t ColumnDef> {
    table
        .columns
        .iter()
        .filter(|c| !existing.contains(c.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::template;

    fn cols(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // Axum handlers need Send futures. This does not run; it fails to
    // compile if provisioning ever loses that bound again.
    fn _provisioning_futures_are_send(pool: &PgPool, schema: &SchemaName) {
        fn assert_send<T: Send>(_: T) {}
        assert_send(provision(pool, "lear_1291"));
        assert_send(reconcile(pool, schema));
    }

    #[test]
    fn fresh_schema_plans_every_table() {
        let planned = missing_tables(&HashSet::new());
        assert_eq!(planned.len(), SCHOOL_TEMPLATE.len());
    }

    #[test]
    fn fully_provisioned_schema_plans_nothing() {
        let existing: HashSet<String> =
            SCHOOL_TEMPLATE.iter().map(|t| t.name.to_string()).collect();
        assert!(missing_tables(&existing).is_empty());
    }

    #[test]
    fn extra_tables_are_tolerated() {
        let mut existing: HashSet<String> =
            SCHOOL_TEMPLATE.iter().map(|t| t.name.to_string()).collect();
        existing.insert("legacy_reports".into());
        assert!(missing_tables(&existing).is_empty());
    }

    #[test]
    fn column_diff_converges() {
        let table = template::table("incidents").unwrap();
        let all: HashSet<String> = table.columns.iter().map(|c| c.name.to_string()).collect();

        // Older schema missing the denormalized display column.
        let mut older = all.clone();
        older.remove("student_name");
        let planned = missing_columns(table, &older);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].name, "student_name");
        assert!(planned[0].backfill.is_some());

        // After repair the same diff plans nothing.
        assert!(missing_columns(table, &all).is_empty());
    }

    #[test]
    fn extra_columns_are_tolerated() {
        let table = template::table("students").unwrap();
        let mut existing: HashSet<String> =
            table.columns.iter().map(|c| c.name.to_string()).collect();
        existing.insert("locally_added".into());
        assert!(missing_columns(table, &existing).is_empty());
    }
}
