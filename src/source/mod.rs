//! Data source abstractions
//!
//! The export engine never talks to a driver directly. It consumes:
//! - [`Database`]: begins transactions
//! - [`Transaction`]: opens cursors for plain queries and call blocks
//! - [`Cursor`]: yields rows, scanning each one into the column converters
//!
//! Two backends are provided: [`sqlite`] (via sqlx) and [`memory`]
//! (in-process result sets, used by tests and embedders).

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{Result, ScanError};
use crate::export::converter::Converter;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

/// Rows fetched per round trip to the data source
pub const FETCH_BATCH_SIZE: usize = 1024;

/// Scan type category of a result column, resolved once at cursor-open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanType {
    Text,
    Float,
    Integer,
    Time,
    /// Anything the converter layer cannot distinguish; keeps the native name
    Other(String),
}

impl ScanType {
    /// Map a native SQL type name to a scan type
    ///
    /// # Arguments
    /// * `name` - Driver type name such as `VARCHAR2`, `BIGINT` or `DATETIME`
    ///
    /// # Returns
    /// * `ScanType` - Matching category, `Other` when unrecognised
    pub fn from_type_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        // Drop length/precision suffixes such as VARCHAR(20)
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "TEXT" | "VARCHAR" | "VARCHAR2" | "NVARCHAR" | "NVARCHAR2" | "CHAR" | "NCHAR"
            | "CHARACTER" | "STRING" | "ROWID" => ScanType::Text,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "BINARY_FLOAT"
            | "BINARY_DOUBLE" | "FLOAT4" | "FLOAT8" => ScanType::Float,
            "INTEGER" | "INT" | "INT2" | "INT4" | "INT8" | "BIGINT" | "SMALLINT" | "TINYINT"
            | "MEDIUMINT" | "BOOLEAN" | "BOOL" => ScanType::Integer,
            "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => ScanType::Time,
            _ if base.starts_with("TIMESTAMP") => ScanType::Time,
            _ => ScanType::Other(upper.clone()),
        }
    }
}

/// Name and scan type of one result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub scan_type: ScanType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            name: name.into(),
            scan_type,
        }
    }
}

/// Driver-neutral cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Time(NaiveDateTime),
}

/// Sequential, closeable iterator over query result rows
#[async_trait]
pub trait Cursor: Send {
    /// Column descriptors, in result order
    fn columns(&self) -> &[ColumnDescriptor];

    /// Advance to the next row.
    ///
    /// # Returns
    /// * `Result<bool>` - `false` once exhausted; the terminal cursor error otherwise
    async fn next(&mut self) -> Result<bool>;

    /// Scan the current row into the converters, positionally
    fn scan(&mut self, dest: &mut [Converter]) -> Result<()>;

    /// Close the cursor and release its resources
    async fn close(&mut self) -> Result<()>;
}

/// A transaction shared by every cursor of one run
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a query and return a cursor over its rows
    async fn query(&self, sql: &str) -> Result<Box<dyn Cursor>>;

    /// Execute a call block whose first placeholder is an output cursor,
    /// binding `params` to the following placeholders
    async fn call(&self, block: &str, params: &[String]) -> Result<Box<dyn Cursor>>;

    /// Roll back. Idempotent on an already finished transaction.
    async fn rollback(&self) -> Result<()>;
}

/// A connection that can begin transactions
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>>;
}

/// Assign one fetched row to the converters, in column order.
///
/// On failure the error carries the cause and a snapshot of the destination
/// kinds.
pub fn scan_row(row: Vec<Value>, dest: &mut [Converter]) -> Result<()> {
    let snapshot = |cause: String, dest: &[Converter]| ScanError {
        cause,
        destinations: dest.iter().map(|c| c.kind().name()).collect(),
    };

    if row.len() != dest.len() {
        let cause = format!("row has {} values for {} columns", row.len(), dest.len());
        return Err(snapshot(cause, &*dest).into());
    }

    for (i, value) in row.into_iter().enumerate() {
        if let Err(cause) = dest[i].assign(value) {
            return Err(snapshot(format!("column {}: {cause}", i + 1), &*dest).into());
        }
    }
    Ok(())
}
