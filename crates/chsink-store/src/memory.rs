//! In-process store.
//!
//! Keeps executed statements and committed rows in memory, counts
//! transaction activity, and can be told to fail specific operations.
//! Transactions stage rows privately; only `commit` makes them visible.
//!
//! NOTE: This is not durable and does not interpret SQL beyond
//! `CREATE TABLE` names and column-list inserts.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::insert::InsertStatement;
use crate::{Result, Statement, Store, StoreError, Transaction, Value};

/// One stored row, keyed by column name.
pub type MemoryRow = BTreeMap<String, Value>;

/// Transaction activity observed by a [`MemoryStore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCounters {
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// Prepared-statement executions, successful or not.
    pub row_executions: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_begin: bool,
    fail_commit: bool,
    /// Countdown to a one-shot row failure (1 = the next execution).
    fail_row_in: Option<u64>,
    fail_prefixes: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    statements: Vec<String>,
    tables: BTreeMap<String, Vec<MemoryRow>>,
    counters: MemoryCounters,
    faults: Faults,
    closed: bool,
}

impl Inner {
    fn check_statement(&self, sql: &str) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        let head = sql.trim_start();
        let matched = self.faults.fail_prefixes.iter().any(|prefix| {
            head.get(..prefix.len())
                .is_some_and(|h| h.eq_ignore_ascii_case(prefix))
        });
        if matched {
            return Err(StoreError::Injected(format!("statement {:?}", head)));
        }
        Ok(())
    }

    fn count_row_execution(&mut self) -> Result<()> {
        self.counters.row_executions += 1;
        match self.faults.fail_row_in {
            Some(n) if n <= 1 => {
                self.faults.fail_row_in = None;
                Err(StoreError::Injected(format!(
                    "row execution #{}",
                    self.counters.row_executions
                )))
            }
            Some(n) => {
                self.faults.fail_row_in = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn created_table(sql: &str) -> Option<String> {
    let mut tokens = sql.split_whitespace().peekable();
    let create = tokens.next()?;
    let table = tokens.next()?;
    if !create.eq_ignore_ascii_case("CREATE") || !table.eq_ignore_ascii_case("TABLE") {
        return None;
    }
    if tokens
        .peek()
        .is_some_and(|t| t.eq_ignore_ascii_case("IF"))
    {
        tokens.next();
        tokens.next();
        tokens.next();
    }
    let name = tokens.next()?.split('(').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn to_row(stmt: &InsertStatement, params: &[Value]) -> Result<MemoryRow> {
    Ok(stmt
        .bind(params)?
        .into_iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect())
}

/// In-memory [`Store`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `begin` fail while set.
    pub fn fail_begin(&self, enabled: bool) {
        self.lock().faults.fail_begin = enabled;
    }

    /// Make every `commit` fail while set.
    pub fn fail_commit(&self, enabled: bool) {
        self.lock().faults.fail_commit = enabled;
    }

    /// Fail the `n`th prepared-statement execution from now (1-based), once.
    pub fn fail_nth_row(&self, n: u64) {
        self.lock().faults.fail_row_in = Some(n.max(1));
    }

    /// Fail statements (executed or prepared) starting with `prefix`,
    /// ignoring case and leading whitespace.
    pub fn fail_statements_starting_with(&self, prefix: impl Into<String>) {
        self.lock().faults.fail_prefixes.push(prefix.into());
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// Statements run through [`Store::execute`], in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Whether `table` was created or written to.
    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn counters(&self) -> MemoryCounters {
        self.lock().counters
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Store for MemoryStore {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut inner = self.lock();
        inner.check_statement(sql)?;
        if params.is_empty() {
            if let Some(table) = created_table(sql) {
                inner.tables.entry(table).or_default();
            }
        } else {
            let stmt = InsertStatement::parse(sql)?;
            let row = to_row(&stmt, params)?;
            inner.tables.entry(stmt.table).or_default().push(row);
        }
        inner.statements.push(sql.trim().to_string());
        Ok(())
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if inner.faults.fail_begin {
            return Err(StoreError::Injected("begin".into()));
        }
        inner.counters.begins += 1;
        Ok(Box::new(MemoryTransaction {
            store: self,
            staged: Vec::new(),
        }))
    }

    fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

struct MemoryTransaction<'s> {
    store: &'s MemoryStore,
    staged: Vec<(String, MemoryRow)>,
}

impl Transaction for MemoryTransaction<'_> {
    fn prepare<'t>(&'t mut self, sql: &str) -> Result<Box<dyn Statement + 't>> {
        self.store.lock().check_statement(sql)?;
        let stmt = InsertStatement::parse(sql)?;
        Ok(Box::new(MemoryStatement {
            store: self.store,
            stmt,
            staged: &mut self.staged,
        }))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut inner = this.store.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if inner.faults.fail_commit {
            return Err(StoreError::Injected("commit".into()));
        }
        for (table, row) in this.staged {
            inner.tables.entry(table).or_default().push(row);
        }
        inner.counters.commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.store.lock().counters.rollbacks += 1;
        Ok(())
    }
}

struct MemoryStatement<'t> {
    store: &'t MemoryStore,
    stmt: InsertStatement,
    staged: &'t mut Vec<(String, MemoryRow)>,
}

impl Statement for MemoryStatement<'_> {
    fn execute(&mut self, params: &[Value]) -> Result<()> {
        self.store.lock().count_row_execution()?;
        let row = to_row(&self.stmt, params)?;
        self.staged.push((self.stmt.table.clone(), row));
        Ok(())
    }
}
