//! chsink storage drivers.
//!
//! This crate provides:
//! - The [`Store`] / [`Transaction`] / [`Statement`] seam the pipeline writes through
//! - [`Value`], the parameter type bound to prepared statements
//! - [`HttpStore`], a ClickHouse driver over the HTTP interface
//! - [`MemoryStore`], an in-process store with fault injection

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod http;
pub mod insert;
pub mod memory;

pub use http::HttpStore;
pub use insert::InsertStatement;
pub use memory::{MemoryCounters, MemoryStore};

/// Errors surfaced by store drivers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("statement expects {expected} parameters, got {actual}")]
    ParamCount { expected: usize, actual: usize },

    #[error("store is closed")]
    Closed,

    #[error("injected failure: {0}")]
    Injected(String),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt64(u64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Map(BTreeMap<String, String>),
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(v: BTreeMap<String, String>) -> Self {
        Value::Map(v)
    }
}

/// A connection to an analytical store.
pub trait Store: Send + Sync {
    /// Run one statement. With parameters, `sql` must be an
    /// `INSERT INTO table (columns...)` statement and one row is written.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<()>;

    /// Open a transaction.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;

    /// Release the connection. Later calls fail with [`StoreError::Closed`].
    fn close(&self) -> Result<()>;
}

/// A unit of all-or-nothing writes.
///
/// Dropping a transaction without committing discards its writes.
pub trait Transaction {
    /// Prepare a parameterized `INSERT INTO table (columns...)` statement.
    fn prepare<'t>(&'t mut self, sql: &str) -> Result<Box<dyn Statement + 't>>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A prepared statement, executed once per row.
pub trait Statement {
    fn execute(&mut self, params: &[Value]) -> Result<()>;
}
