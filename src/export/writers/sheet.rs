//! Multi-sheet documents
//!
//! A [`Document`] hands out one [`Sheet`] per query. Sheets created from the
//! same document may be written from different tasks concurrently; each
//! implementation is responsible for serializing access to shared state.

use async_trait::async_trait;

use crate::error::Result;
use crate::export::converter::Converter;
use crate::source::ColumnDescriptor;

use super::RowSink;

/// One named, ordered sheet of a document
#[async_trait]
pub trait Sheet: Send {
    /// Sheet name as passed to [`Document::new_sheet`]
    fn name(&self) -> &str;

    /// Append one row of typed cells
    async fn append_row(&mut self, row: &[Converter]) -> Result<()>;

    /// Finish the sheet. No rows may be appended afterwards.
    async fn close(&mut self) -> Result<()>;
}

/// A workbook-like container of sheets
#[async_trait]
pub trait Document: Send {
    /// Create a sheet with the given header row.
    ///
    /// # Arguments
    /// * `name` - Sheet name
    /// * `header` - One label per column; all-empty means no header row
    async fn new_sheet(&mut self, name: &str, header: &[String]) -> Result<Box<dyn Sheet>>;

    /// Finalize and write out the document. Called once, after every sheet
    /// has been closed.
    async fn close(&mut self) -> Result<()>;
}

/// Adapts a [`Sheet`] to the [`RowSink`] interface
pub struct SheetSink {
    sheet: Box<dyn Sheet>,
}

impl SheetSink {
    pub fn new(sheet: Box<dyn Sheet>) -> Self {
        Self { sheet }
    }

    /// Give back the sheet so the caller can close it
    pub fn into_inner(self) -> Box<dyn Sheet> {
        self.sheet
    }
}

#[async_trait]
impl RowSink for SheetSink {
    // The header row is written when the sheet is created
    async fn begin(&mut self, _columns: &[ColumnDescriptor]) -> Result<()> {
        Ok(())
    }

    async fn write_row(&mut self, row: &[Converter]) -> Result<()> {
        self.sheet.append_row(row).await
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
