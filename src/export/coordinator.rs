//! Export coordinator
//!
//! Runs a dump against one transaction:
//! 1. Begin a read-only transaction, falling back to read-write
//! 2. Open the cursor(s) and prepare the output
//! 3. Stream rows (one task per sheet in multi-sheet mode)
//! 4. Close the output, then roll the transaction back
//!
//! The transaction is always rolled back, whatever happened before.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DumpError, Result};
use crate::query::{QueryRequest, SheetSpec};
use crate::source::{Cursor, Database, Transaction};

use super::converter::{ConverterFactory, DateLayout};
use super::progress::DumpSummary;
use super::streaming::RowStreamer;
use super::writers::{CsvOptions, CsvSink, Document, Sheet, SheetSink};

/// Settings shared by every dump of a run
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub csv: CsvOptions,
    pub layout: Arc<DateLayout>,
    /// Upper bound on sheets streamed at once; `None` streams all together
    pub max_concurrent_sheets: Option<usize>,
    /// Show a progress spinner for CSV dumps
    pub progress: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            csv: CsvOptions::default(),
            layout: Arc::new(DateLayout::default()),
            max_concurrent_sheets: None,
            progress: false,
        }
    }
}

/// Outcome of one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetReport {
    pub name: String,
    pub summary: DumpSummary,
}

/// A sheet whose cursor and sheet are open but not yet streamed
struct PreparedSheet {
    name: String,
    query: String,
    cursor: Box<dyn Cursor>,
    sheet: Box<dyn Sheet>,
}

impl PreparedSheet {
    /// Close cursor and sheet without streaming (abort path)
    async fn abandon(mut self) {
        if let Err(e) = self.cursor.close().await {
            warn!("Closing cursor of sheet {:?}: {}", self.name, e);
        }
        if let Err(e) = self.sheet.close().await {
            warn!("Closing sheet {:?}: {}", self.name, e);
        }
    }
}

/// Coordinator for dump operations
pub struct ExportCoordinator {
    options: ExportOptions,
    cancel: CancellationToken,
}

impl ExportCoordinator {
    /// Create a new coordinator
    pub fn new(options: ExportOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Set cancellation token for this coordinator's dumps
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Dump a single query as CSV.
    ///
    /// # Arguments
    /// * `db` - Data source
    /// * `request` - Plain query or call block
    /// * `output` - Destination of the CSV text; flushed before returning
    ///
    /// # Returns
    /// * `Result<DumpSummary>` - Rows written and elapsed time
    pub async fn dump_csv<W>(&self, db: &dyn Database, request: &QueryRequest, output: W) -> Result<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let tx = begin_shared(db).await?;
        let result = self.stream_csv(tx.as_ref(), request, output).await;
        rollback(tx.as_ref()).await;
        result
    }

    async fn stream_csv<W>(&self, tx: &dyn Transaction, request: &QueryRequest, output: W) -> Result<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        debug!("Executing {:?}", request.text());
        let mut cursor = match request {
            QueryRequest::Sql(sql) => tx.query(sql).await?,
            QueryRequest::Call(call) => {
                debug!("Call parameters: {:?}", call.params);
                tx.call(&call.block, &call.params).await?
            }
        };

        let factory = ConverterFactory::csv(&self.options.csv.separator, Arc::clone(&self.options.layout));
        let mut converters = factory.converters(cursor.columns());
        let mut sink = CsvSink::new(output, self.options.csv.clone());

        let streamed = RowStreamer::new("csv", self.cancel.clone())
            .with_progress(self.options.progress)
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await;
        let closed = cursor.close().await;

        let summary = streamed?;
        closed?;
        Ok(summary)
    }

    /// Dump several queries, one sheet each, into `document`.
    ///
    /// Every query is opened and its sheet created in order before any row is
    /// streamed; a failure there aborts the run. Sheets are then streamed
    /// concurrently. When several sheets fail, the error of the first one (in
    /// argument order) is returned. The document is closed in every case once
    /// setup has begun.
    ///
    /// # Arguments
    /// * `db` - Data source
    /// * `specs` - Sheet specifications, in output order
    /// * `document` - Destination document
    ///
    /// # Returns
    /// * `Result<Vec<SheetReport>>` - One report per sheet, in order
    pub async fn dump_sheets(
        &self,
        db: &dyn Database,
        specs: &[SheetSpec],
        mut document: Box<dyn Document>,
    ) -> Result<Vec<SheetReport>> {
        let tx = begin_shared(db).await?;

        let result = self.stream_sheets(tx.as_ref(), specs, document.as_mut()).await;
        let closed = document.close().await;
        rollback(tx.as_ref()).await;

        let reports = result?;
        closed?;
        Ok(reports)
    }

    async fn stream_sheets(
        &self,
        tx: &dyn Transaction,
        specs: &[SheetSpec],
        document: &mut dyn Document,
    ) -> Result<Vec<SheetReport>> {
        let mut prepared = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            match self.prepare_sheet(tx, document, spec.name(index), &spec.query).await {
                Ok(sheet) => prepared.push(sheet),
                Err(e) => {
                    for sheet in prepared {
                        sheet.abandon().await;
                    }
                    return Err(e);
                }
            }
        }

        let limit = self.options.max_concurrent_sheets.map(|n| Arc::new(Semaphore::new(n)));
        let names: Vec<String> = prepared.iter().map(|s| s.name.clone()).collect();
        info!("Dumping {} sheets", prepared.len());

        let handles: Vec<_> = prepared
            .into_iter()
            .map(|sheet| {
                let factory = ConverterFactory::sheet(Arc::clone(&self.options.layout));
                tokio::spawn(run_sheet(sheet, factory, self.cancel.clone(), limit.clone()))
            })
            .collect();
        let joined = futures::future::join_all(handles).await;

        let mut reports = Vec::with_capacity(names.len());
        let mut first_error = None;
        for (name, outcome) in names.into_iter().zip(joined) {
            let outcome = outcome.unwrap_or_else(|e| Err(DumpError::Task(format!("sheet {name:?}: {e}"))));
            match outcome {
                Ok(summary) => reports.push(SheetReport { name, summary }),
                Err(e) => {
                    warn!("Sheet {:?} failed: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    async fn prepare_sheet(
        &self,
        tx: &dyn Transaction,
        document: &mut dyn Document,
        name: String,
        query: &str,
    ) -> Result<PreparedSheet> {
        let mut cursor = tx.query(query).await.map_err(|e| DumpError::setup(&name, e))?;

        let header: Vec<String> = if self.options.csv.header {
            cursor.columns().iter().map(|c| c.name.clone()).collect()
        } else {
            vec![String::new(); cursor.columns().len()]
        };

        match document.new_sheet(&name, &header).await {
            Ok(sheet) => Ok(PreparedSheet {
                name,
                query: query.to_string(),
                cursor,
                sheet,
            }),
            Err(e) => {
                if let Err(close_err) = cursor.close().await {
                    warn!("Closing cursor of sheet {:?}: {}", name, close_err);
                }
                Err(DumpError::setup(&name, e))
            }
        }
    }
}

/// Stream one prepared sheet, then close its cursor and sheet
async fn run_sheet(
    prepared: PreparedSheet,
    factory: ConverterFactory,
    cancel: CancellationToken,
    limit: Option<Arc<Semaphore>>,
) -> Result<DumpSummary> {
    let PreparedSheet {
        name,
        query,
        mut cursor,
        sheet,
    } = prepared;

    // The semaphore is never closed, so acquisition only fails if it was
    let _permit = match limit {
        Some(limit) => limit.acquire_owned().await.ok(),
        None => None,
    };
    debug!("Sheet {:?}: {}", name, query);

    let mut converters = factory.converters(cursor.columns());
    let mut sink = SheetSink::new(sheet);
    let streamed = RowStreamer::new(&name, cancel)
        .run(cursor.as_mut(), &mut converters, &mut sink)
        .await;

    let cursor_closed = cursor.close().await;
    let sheet_closed = sink.into_inner().close().await;

    let summary = streamed?;
    cursor_closed?;
    sheet_closed?;
    Ok(summary)
}

/// Begin the run's transaction, read-only when the source allows it
async fn begin_shared(db: &dyn Database) -> Result<Box<dyn Transaction>> {
    match db.begin(true).await {
        Ok(tx) => Ok(tx),
        Err(e) => {
            warn!("Read-only transaction: {}", e);
            db.begin(false).await
        }
    }
}

async fn rollback(tx: &dyn Transaction) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback: {}", e);
    }
}
