//! SQLite backend
//!
//! A SQLite transaction cannot interleave two running statements, so each
//! cursor takes the transaction lock for as long as it fetches. Column
//! discovery only prepares the statement and releases the lock right away;
//! fetching starts on the first `next()` call. Cursors of concurrent sheet
//! tasks therefore run one after another instead of deadlocking.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, Statement, TypeInfo, ValueRef};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{DumpError, Result, ScanError};
use crate::export::converter::{Converter, ConverterKind};

use super::{
    ColumnDescriptor, Cursor, Database, FETCH_BATCH_SIZE, ScanType, Transaction, Value, scan_row,
};

type SharedTx = Arc<Mutex<Option<sqlx::Transaction<'static, Sqlite>>>>;
type Batch = Vec<Vec<Value>>;

/// SQLite database reached through a single-connection pool
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Connect to a SQLite database
    ///
    /// # Arguments
    /// * `url` - Connection string, e.g. `sqlite://data.db` or `sqlite::memory:`
    ///
    /// # Returns
    /// * `Result<Self>` - Connected database or error
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?;
        // One connection: every transaction of a run lives on it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!("Connected to {}", url);
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        if read_only {
            sqlx::query("PRAGMA query_only = ON").execute(&mut *tx).await?;
        }
        debug!("Began SQLite transaction (read_only: {})", read_only);

        Ok(Box::new(SqliteTransaction {
            tx: Arc::new(Mutex::new(Some(tx))),
            read_only,
        }))
    }
}

struct SqliteTransaction {
    tx: SharedTx,
    read_only: bool,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn query(&self, sql: &str) -> Result<Box<dyn Cursor>> {
        let columns = {
            let mut guard = self.tx.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| DumpError::execution(sql, "transaction already finished"))?;

            let statement = (&mut **tx)
                .prepare(sql)
                .await
                .map_err(|e| DumpError::execution(sql, e))?;

            statement
                .columns()
                .iter()
                .map(|c| ColumnDescriptor::new(c.name(), ScanType::from_type_name(c.type_info().name())))
                .collect::<Vec<_>>()
        };

        debug!("Prepared {:?} with {} columns", sql, columns.len());
        Ok(Box::new(SqliteCursor::new(Arc::clone(&self.tx), sql, columns)))
    }

    async fn call(&self, block: &str, _params: &[String]) -> Result<Box<dyn Cursor>> {
        Err(DumpError::execution(
            block,
            "SQLite has no stored routines returning cursors",
        ))
    }

    async fn rollback(&self) -> Result<()> {
        let Some(mut tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        if self.read_only {
            sqlx::query("PRAGMA query_only = OFF").execute(&mut *tx).await?;
        }
        tx.rollback().await?;
        debug!("Rolled back SQLite transaction");
        Ok(())
    }
}

struct SqliteCursor {
    tx: SharedTx,
    sql: String,
    columns: Vec<ColumnDescriptor>,
    receiver: Option<mpsc::Receiver<Result<Batch>>>,
    producer: Option<JoinHandle<()>>,
    batch: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    finished: bool,
}

impl SqliteCursor {
    fn new(tx: SharedTx, sql: &str, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            tx,
            sql: sql.to_string(),
            columns,
            receiver: None,
            producer: None,
            batch: VecDeque::new(),
            current: None,
            finished: false,
        }
    }

    /// Spawn the task that owns the transaction lock and streams batches
    fn start(&mut self) {
        let (sender, receiver) = mpsc::channel(1);
        let tx = Arc::clone(&self.tx);
        let sql = self.sql.clone();
        let types: Vec<ScanType> = self.columns.iter().map(|c| c.scan_type.clone()).collect();

        self.producer = Some(tokio::spawn(async move {
            let mut guard = tx.lock_owned().await;
            let Some(conn) = guard.as_mut() else {
                let _ = sender
                    .send(Err(DumpError::execution(&sql, "transaction already finished")))
                    .await;
                return;
            };

            let mut rows = sqlx::query(sql.as_str()).fetch(&mut **conn);
            let mut batch = Vec::with_capacity(FETCH_BATCH_SIZE);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        match decode_row(&row, &types) {
                            Ok(values) => batch.push(values),
                            Err(cause) => {
                                let error = ScanError {
                                    cause,
                                    destinations: types.iter().map(|t| ConverterKind::of(t).name()).collect(),
                                };
                                let _ = sender.send(Err(error.into())).await;
                                return;
                            }
                        }
                        if batch.len() == FETCH_BATCH_SIZE {
                            let full = std::mem::replace(&mut batch, Vec::with_capacity(FETCH_BATCH_SIZE));
                            if sender.send(Ok(full)).await.is_err() {
                                // Cursor closed early
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        if !batch.is_empty() {
                            let _ = sender.send(Ok(batch)).await;
                        }
                        return;
                    }
                    Err(e) => {
                        let _ = sender.send(Err(DumpError::execution(&sql, e))).await;
                        return;
                    }
                }
            }
        }));
        self.receiver = Some(receiver);
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    async fn next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if self.receiver.is_none() {
            self.start();
        }

        if self.batch.is_empty() {
            let Some(receiver) = self.receiver.as_mut() else {
                return Ok(false);
            };
            match receiver.recv().await {
                Some(Ok(batch)) => self.batch.extend(batch),
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    self.finished = true;
                    return Ok(false);
                }
            }
        }

        self.current = self.batch.pop_front();
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
        self.finished = true;
        self.receiver = None;
        self.batch.clear();
        if let Some(producer) = self.producer.take() {
            producer.abort();
            // Wait until the transaction lock is released
            let _ = producer.await;
        }
        Ok(())
    }
}

/// Decode one row by the storage class of each value.
///
/// SQLite columns are dynamically typed, so a value is read as what it is
/// stored as and the converters do any coercion, failing on mismatches.
fn decode_row(row: &SqliteRow, types: &[ScanType]) -> std::result::Result<Vec<Value>, String> {
    types
        .iter()
        .enumerate()
        .map(|(i, scan_type)| decode_value(row, i, scan_type).map_err(|e| format!("column {}: {e}", i + 1)))
        .collect()
}

fn decode_value(row: &SqliteRow, i: usize, scan_type: &ScanType) -> std::result::Result<Value, sqlx::Error> {
    let storage = {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    if *scan_type == ScanType::Time {
        if let Some(time) = decode_time(row, i) {
            return Ok(Value::Time(time));
        }
    }

    Ok(match storage.as_str() {
        "INTEGER" => Value::Int(row.try_get_unchecked(i)?),
        "REAL" => Value::Float(row.try_get_unchecked(i)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(i)?;
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::Text(row.try_get_unchecked(i)?),
    })
}

/// DATETIME text or numbers decode directly; DATE-only text falls back to midnight
fn decode_time(row: &SqliteRow, i: usize) -> Option<NaiveDateTime> {
    row.try_get_unchecked::<NaiveDateTime, _>(i).ok().or_else(|| {
        row.try_get_unchecked::<NaiveDate, _>(i)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}
