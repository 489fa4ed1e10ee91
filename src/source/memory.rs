//! In-memory database
//!
//! Serves fixed result sets keyed by the exact query (or call block) text.
//! Cursors are independent of each other, so any number of them can be live
//! on one transaction at the same time. Counters record how many cursors were
//! opened and closed and how often transactions were rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DumpError, Result, ScanError};
use crate::export::converter::Converter;

use super::{ColumnDescriptor, Cursor, Database, Transaction, Value, scan_row};

/// Columns and rows returned for one query
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
    fail_after: Option<(usize, String)>,
    stall_after: Option<usize>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Append one row
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Make the cursor fail with `message` after yielding `rows` rows
    pub fn fail_after(mut self, rows: usize, message: &str) -> Self {
        self.fail_after = Some((rows, message.to_string()));
        self
    }

    /// Make the cursor block forever after yielding `rows` rows
    pub fn stall_after(mut self, rows: usize) -> Self {
        self.stall_after = Some(rows);
        self
    }
}

/// Counters shared by a database and everything it opened
#[derive(Debug, Default)]
pub struct MemoryStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    rollbacks: AtomicUsize,
    read_only: AtomicBool,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MemoryStats {
    /// Cursors opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// `close` calls received by cursors so far
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Transactions rolled back so far
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Whether the last transaction begun was read-only
    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Executed call blocks with their bound parameters
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// Database serving registered result sets
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    queries: Arc<HashMap<String, ResultSet>>,
    calls: Arc<HashMap<String, ResultSet>>,
    reject_read_only: bool,
    stats: Arc<MemoryStats>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result of a plain query
    pub fn with_query(mut self, sql: &str, result: ResultSet) -> Self {
        Arc::make_mut(&mut self.queries).insert(sql.to_string(), result);
        self
    }

    /// Register the output cursor of a call block
    pub fn with_call(mut self, block: &str, result: ResultSet) -> Self {
        Arc::make_mut(&mut self.calls).insert(block.to_string(), result);
        self
    }

    /// Refuse read-only transactions, like sources without that mode
    pub fn reject_read_only(mut self) -> Self {
        self.reject_read_only = true;
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        if read_only && self.reject_read_only {
            return Err(DumpError::execution(
                "BEGIN READ ONLY",
                "read-only transactions are not supported",
            ));
        }
        self.stats.read_only.store(read_only, Ordering::SeqCst);

        Ok(Box::new(MemoryTransaction {
            queries: Arc::clone(&self.queries),
            calls: Arc::clone(&self.calls),
            stats: Arc::clone(&self.stats),
            finished: AtomicBool::new(false),
        }))
    }
}

struct MemoryTransaction {
    queries: Arc<HashMap<String, ResultSet>>,
    calls: Arc<HashMap<String, ResultSet>>,
    stats: Arc<MemoryStats>,
    finished: AtomicBool,
}

impl MemoryTransaction {
    fn open(&self, label: &str, result: Option<&ResultSet>) -> Result<Box<dyn Cursor>> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(DumpError::execution(label, "transaction already finished"));
        }
        let result = result.ok_or_else(|| DumpError::execution(label, "no such table or view"))?;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryCursor {
            label: label.to_string(),
            columns: result.columns.clone(),
            rows: result.rows.clone().into_iter(),
            current: None,
            yielded: 0,
            fail_after: result.fail_after.clone(),
            stall_after: result.stall_after,
            stats: Arc::clone(&self.stats),
        }))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&self, sql: &str) -> Result<Box<dyn Cursor>> {
        self.open(sql, self.queries.get(sql))
    }

    async fn call(&self, block: &str, params: &[String]) -> Result<Box<dyn Cursor>> {
        if let Ok(mut calls) = self.stats.calls.lock() {
            calls.push((block.to_string(), params.to_vec()));
        }
        self.open(block, self.calls.get(block))
    }

    async fn rollback(&self) -> Result<()> {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
            debug!("Rolled back in-memory transaction");
        }
        Ok(())
    }
}

struct MemoryCursor {
    label: String,
    columns: Vec<ColumnDescriptor>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    yielded: usize,
    fail_after: Option<(usize, String)>,
    stall_after: Option<usize>,
    stats: Arc<MemoryStats>,
}

#[async_trait]
impl Cursor for MemoryCursor {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    async fn next(&mut self) -> Result<bool> {
        if let Some((after, message)) = &self.fail_after {
            if self.yielded == *after {
                return Err(DumpError::execution(&self.label, message));
            }
        }
        if self.stall_after == Some(self.yielded) {
            std::future::pending::<()>().await;
        }

        self.current = self.rows.next();
        if self.current.is_some() {
            self.yielded += 1;
        }
        Ok(self.current.is_some())
    }

    fn scan(&mut self, dest: &mut [Converter]) -> Result<()> {
        match self.current.take() {
            Some(row) => scan_row(row, dest),
            None => Err(ScanError {
                cause: "no current row".to_string(),
                destinations: dest.iter().map(|c| c.kind().name()).collect(),
            }
            .into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ScanType;

    fn users() -> ResultSet {
        ResultSet::new(vec![ColumnDescriptor::new("ID", ScanType::Integer)])
            .row(vec![Value::Int(1)])
            .row(vec![Value::Int(2)])
    }

    #[tokio::test]
    async fn test_query_yields_rows() {
        let db = MemoryDatabase::new().with_query("SELECT * FROM users", users());
        let tx = db.begin(true).await.unwrap();
        let mut cursor = tx.query("SELECT * FROM users").await.unwrap();
        let mut dest = vec![Converter::Int(None)];

        let mut seen = Vec::new();
        while cursor.next().await.unwrap() {
            cursor.scan(&mut dest).unwrap();
            seen.push(dest[0].render().into_owned());
        }
        cursor.close().await.unwrap();

        assert_eq!(seen, vec!["1", "2"]);
        assert_eq!(db.stats().opened(), 1);
        assert_eq!(db.stats().closed(), 1);
    }

    #[tokio::test]
    async fn test_unknown_query_fails() {
        let db = MemoryDatabase::new();
        let tx = db.begin(false).await.unwrap();
        let err = tx.query("SELECT * FROM nope").await.err().unwrap();
        assert!(matches!(err, DumpError::QueryExecution { .. }));
    }

    #[tokio::test]
    async fn test_fail_after_surfaces_terminal_error() {
        let db = MemoryDatabase::new().with_query("q", users().fail_after(1, "ORA-01555"));
        let tx = db.begin(true).await.unwrap();
        let mut cursor = tx.query("q").await.unwrap();
        assert!(cursor.next().await.unwrap());
        assert!(cursor.next().await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_is_idempotent() {
        let db = MemoryDatabase::new();
        let tx = db.begin(true).await.unwrap();
        tx.rollback().await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(db.stats().rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_reject_read_only() {
        let db = MemoryDatabase::new().reject_read_only();
        assert!(db.begin(true).await.is_err());
        assert!(db.begin(false).await.is_ok());
        assert!(!db.stats().read_only());
    }
}
