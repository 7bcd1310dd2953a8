//! Schema bootstrap.
//!
//! Creates the database and both tables if missing, and records the run.
//! Runs once at startup, before the first flush.
//!
//! Both tables use `ReplacingMergeTree(start)` partitioned by the month of
//! the run start, so re-sent rows collapse during merges and old runs can be
//! dropped partition by partition.

use chsink_config::SinkConfig;
use chsink_store::{Store, Value};
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result};
use crate::run::Run;

/// Fully qualified table names (`database.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    pub database: String,
    pub runs_table: String,
    pub samples_table: String,
}

impl SchemaNames {
    /// Names from a validated configuration. Identifiers are checked during
    /// resolution, so they are safe to splice into SQL unquoted.
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            database: config.database.clone(),
            runs_table: format!("{}.{}", config.database, config.runs_table),
            samples_table: format!("{}.{}", config.database, config.samples_table),
        }
    }
}

pub fn create_database_sql(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database}")
}

pub fn create_runs_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id UInt64,
    start DateTime64(9, 'UTC'),
    name String,
    params String
) ENGINE = ReplacingMergeTree(start)
PARTITION BY toYYYYMM(start)
ORDER BY (id, start, name)"
    )
}

pub fn create_samples_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id UInt64,
    start DateTime64(9, 'UTC'),
    ts DateTime64(9, 'UTC'),
    metric String,
    url String,
    label String,
    status String,
    name String,
    tags Map(String, String),
    value Float64
) ENGINE = ReplacingMergeTree(start)
PARTITION BY toYYYYMM(start)
ORDER BY (id, start, ts, metric, url, label, status, name)"
    )
}

pub fn insert_run_sql(table: &str) -> String {
    format!("INSERT INTO {table} (id, start, name, params)")
}

/// Create the database and tables if they don't exist.
///
/// A failed database creation is only logged: the database often exists
/// already and the user may lack the privilege to create one. A failed
/// table creation is fatal.
pub fn ensure_schema(store: &dyn Store, names: &SchemaNames) -> Result<()> {
    if let Err(e) = store.execute(&create_database_sql(&names.database), &[]) {
        warn!(
            database = %names.database,
            error = %e,
            "couldn't create database, continuing"
        );
    }

    let tables = [
        (&names.runs_table, create_runs_table_sql(&names.runs_table)),
        (
            &names.samples_table,
            create_samples_table_sql(&names.samples_table),
        ),
    ];
    for (table, ddl) in tables {
        if let Err(source) = store.execute(&ddl, &[]) {
            error!(table = %table, error = %source, "couldn't create table");
            return Err(PipelineError::Schema {
                table: table.clone(),
                source,
            });
        }
        debug!(table = %table, "table ready");
    }
    Ok(())
}

/// Record the run in the runs table. Fatal on failure.
pub fn insert_run(store: &dyn Store, runs_table: &str, run: &Run) -> Result<()> {
    let params = [
        Value::UInt64(run.id.0),
        Value::DateTime(run.start_time),
        Value::String(run.name.clone()),
        Value::String(run.params.clone()),
    ];
    store
        .execute(&insert_run_sql(runs_table), &params)
        .map_err(|source| {
            error!(run_id = %run.id, error = %source, "couldn't insert run");
            PipelineError::RunInsert {
                run_id: run.id,
                source,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chsink_store::MemoryStore;

    fn names() -> SchemaNames {
        let config = SinkConfig {
            database: "k6".into(),
            ..SinkConfig::default()
        };
        SchemaNames::from_config(&config)
    }

    #[test]
    fn qualified_names() {
        let names = names();
        assert_eq!(names.runs_table, "k6.k6_tests");
        assert_eq!(names.samples_table, "k6.k6_samples");
    }

    #[test]
    fn ddl_shape() {
        let ddl = create_samples_table_sql("k6.k6_samples");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS k6.k6_samples ("));
        assert!(ddl.contains("tags Map(String, String)"));
        assert!(ddl.contains("ENGINE = ReplacingMergeTree(start)"));
        assert!(ddl.contains("PARTITION BY toYYYYMM(start)"));
        assert!(ddl.ends_with("ORDER BY (id, start, ts, metric, url, label, status, name)"));
        assert!(create_runs_table_sql("k6.k6_tests").ends_with("ORDER BY (id, start, name)"));
    }

    #[test]
    fn creates_database_then_tables() {
        let store = MemoryStore::new();
        ensure_schema(&store, &names()).unwrap();
        let statements = store.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "CREATE DATABASE IF NOT EXISTS k6");
        assert!(store.has_table("k6.k6_tests"));
        assert!(store.has_table("k6.k6_samples"));
    }

    #[test]
    fn database_failure_is_not_fatal() {
        let store = MemoryStore::new();
        store.fail_statements_starting_with("CREATE DATABASE");
        ensure_schema(&store, &names()).unwrap();
        assert!(store.has_table("k6.k6_samples"));
    }

    #[test]
    fn table_failure_is_fatal() {
        let store = MemoryStore::new();
        store.fail_statements_starting_with("CREATE TABLE");
        match ensure_schema(&store, &names()) {
            Err(PipelineError::Schema { table, .. }) => assert_eq!(table, "k6.k6_tests"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn run_row_is_written() {
        let store = MemoryStore::new();
        let run = Run::new(
            Some("test"),
            Utc.timestamp_opt(1_669_909_784, 10).unwrap(),
            "USERS_1H_0=10",
        );
        insert_run(&store, "k6.k6_tests", &run).unwrap();
        let rows = store.rows("k6.k6_tests");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::UInt64(1_669_909_784_000_000_010));
        assert_eq!(rows[0]["name"], Value::from("test 2022-12-01T15:49:44.000000010Z"));
        assert_eq!(rows[0]["params"], Value::from("USERS_1H_0=10"));
    }

    #[test]
    fn run_insert_failure_is_fatal() {
        let store = MemoryStore::new();
        store.fail_statements_starting_with("INSERT");
        let run = Run::new(None, Utc.timestamp_opt(1, 0).unwrap(), "");
        assert!(matches!(
            insert_run(&store, "k6.k6_tests", &run),
            Err(PipelineError::RunInsert { .. })
        ));
    }
}
