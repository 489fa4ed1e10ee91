//! Row streaming
//!
//! Drives one cursor to exhaustion: advance, scan into the column
//! converters, hand the row to a [`RowSink`]. The loop stops on the first
//! cursor, scan or sink error, or when the cancellation token fires.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DumpError, Result};
use crate::source::{Cursor, FETCH_BATCH_SIZE};

use super::converter::Converter;
use super::progress::{DumpSummary, ProgressTracker};
use super::writers::RowSink;

/// Streams the rows of one cursor into one sink
pub struct RowStreamer<'a> {
    /// Name used in log lines ("csv" or the sheet name)
    label: &'a str,
    cancel: CancellationToken,
    tracker: ProgressTracker,
}

impl<'a> RowStreamer<'a> {
    /// Create a streamer without a progress spinner
    pub fn new(label: &'a str, cancel: CancellationToken) -> Self {
        Self {
            label,
            cancel,
            tracker: ProgressTracker::new(label, false),
        }
    }

    /// Show a progress spinner while streaming
    pub fn with_progress(mut self, enable: bool) -> Self {
        self.tracker = ProgressTracker::new(self.label, enable);
        self
    }

    /// Stream every row of `cursor` into `sink`.
    ///
    /// The sink is finished (flushed) whether or not streaming succeeded, and
    /// a summary line is logged either way. The cursor is left open; closing
    /// it is the caller's job.
    ///
    /// # Arguments
    /// * `cursor` - Open cursor positioned before its first row
    /// * `converters` - One converter per cursor column, reused for every row
    /// * `sink` - Destination of the rendered rows
    ///
    /// # Returns
    /// * `Result<DumpSummary>` - Rows written and elapsed time, or the first error
    pub async fn run<S>(&self, cursor: &mut dyn Cursor, converters: &mut [Converter], sink: &mut S) -> Result<DumpSummary>
    where
        S: RowSink + ?Sized,
    {
        let mut rows = 0u64;

        let streamed = self.pump(cursor, converters, sink, &mut rows).await;
        let flushed = sink.finish().await;

        let summary = self.tracker.finish(rows);

        let outcome = streamed.and(flushed);
        match &outcome {
            Ok(()) => info!(
                "Dumped {}: {} rows in {:?} ({:.0} rows/sec)",
                self.label,
                summary.rows,
                summary.elapsed,
                summary.throughput()
            ),
            Err(e) => info!(
                "Dumped {}: {} rows in {:?} ({:.0} rows/sec), error: {}",
                self.label,
                summary.rows,
                summary.elapsed,
                summary.throughput(),
                e
            ),
        }

        outcome.map(|()| summary)
    }

    async fn pump<S>(&self, cursor: &mut dyn Cursor, converters: &mut [Converter], sink: &mut S, rows: &mut u64) -> Result<()>
    where
        S: RowSink + ?Sized,
    {
        sink.begin(cursor.columns()).await?;

        loop {
            let advanced = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Cancelled {} after {} rows", self.label, rows);
                    return Err(DumpError::Cancelled);
                }
                next = cursor.next() => next?,
            };
            if !advanced {
                return Ok(());
            }

            cursor.scan(converters)?;
            sink.write_row(converters).await?;

            *rows += 1;
            if *rows % FETCH_BATCH_SIZE as u64 == 0 {
                self.tracker.update(*rows);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::converter::{ConverterFactory, DateLayout};
    use crate::source::memory::ResultSet;
    use crate::source::{ColumnDescriptor, Database, MemoryDatabase, ScanType, Value};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        header: Vec<String>,
        lines: Vec<String>,
        finished: usize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl RowSink for RecordingSink {
        async fn begin(&mut self, columns: &[ColumnDescriptor]) -> Result<()> {
            self.header = columns.iter().map(|c| c.name.clone()).collect();
            Ok(())
        }

        async fn write_row(&mut self, row: &[Converter]) -> Result<()> {
            if self.fail_on == Some(self.lines.len()) {
                return Err(DumpError::Io(std::io::Error::other("disk full")));
            }
            let line: Vec<String> = row.iter().map(|c| c.render().into_owned()).collect();
            self.lines.push(line.join(";"));
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished += 1;
            Ok(())
        }
    }

    fn numbers(count: i64) -> ResultSet {
        let mut result = ResultSet::new(vec![
            ColumnDescriptor::new("N", ScanType::Integer),
            ColumnDescriptor::new("LABEL", ScanType::Text),
        ]);
        for n in 0..count {
            result = result.row(vec![Value::Int(n), Value::Text(format!("n{n}"))]);
        }
        result
    }

    async fn open(db: &MemoryDatabase, sql: &str) -> (Box<dyn Cursor>, Vec<Converter>) {
        let tx = db.begin(true).await.unwrap();
        let cursor = tx.query(sql).await.unwrap();
        let factory = ConverterFactory::csv(";", Arc::new(DateLayout::default()));
        let converters = factory.converters(cursor.columns());
        (cursor, converters)
    }

    #[tokio::test]
    async fn test_streams_every_row() {
        let db = MemoryDatabase::new().with_query("q", numbers(3));
        let (mut cursor, mut converters) = open(&db, "q").await;
        let mut sink = RecordingSink::default();

        let summary = RowStreamer::new("csv", CancellationToken::new())
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(sink.header, vec!["N", "LABEL"]);
        assert_eq!(sink.lines, vec!["0;n0", "1;n1", "2;n2"]);
        assert_eq!(sink.finished, 1);
    }

    #[tokio::test]
    async fn test_cursor_error_still_finishes_sink() {
        let db = MemoryDatabase::new().with_query("q", numbers(5).fail_after(2, "connection reset"));
        let (mut cursor, mut converters) = open(&db, "q").await;
        let mut sink = RecordingSink::default();

        let err = RowStreamer::new("csv", CancellationToken::new())
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert_eq!(sink.lines.len(), 2);
        assert_eq!(sink.finished, 1);
    }

    #[tokio::test]
    async fn test_sink_error_stops_loop() {
        let db = MemoryDatabase::new().with_query("q", numbers(5));
        let (mut cursor, mut converters) = open(&db, "q").await;
        let mut sink = RecordingSink {
            fail_on: Some(1),
            ..Default::default()
        };

        let err = RowStreamer::new("csv", CancellationToken::new())
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Io(_)));
        assert_eq!(sink.lines.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_error_stops_loop() {
        let result = ResultSet::new(vec![ColumnDescriptor::new("N", ScanType::Integer)])
            .row(vec![Value::Int(1)])
            .row(vec![Value::Text("not a number".into())]);
        let db = MemoryDatabase::new().with_query("q", result);
        let (mut cursor, mut converters) = open(&db, "q").await;
        let mut sink = RecordingSink::default();

        let err = RowStreamer::new("csv", CancellationToken::new())
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Scan(_)));
        assert_eq!(sink.lines, vec!["1"]);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_blocked_cursor() {
        let db = MemoryDatabase::new().with_query("q", numbers(5).stall_after(2));
        let (mut cursor, mut converters) = open(&db, "q").await;
        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = RowStreamer::new("csv", cancel)
            .run(cursor.as_mut(), &mut converters, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Cancelled));
        assert_eq!(sink.lines.len(), 2);
        assert_eq!(sink.finished, 1);
    }
}
