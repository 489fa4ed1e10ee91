//! Row sinks for dump operations
//!
//! A [`RowSink`] receives the column descriptors once, then every scanned row
//! as a slice of converters. Two families exist:
//! - [`CsvSink`]: delimited text on any async writer
//! - [`SheetSink`]: one sheet of a multi-sheet [`Document`] (xlsx or memory)

use async_trait::async_trait;

use crate::error::Result;
use crate::source::ColumnDescriptor;

use super::converter::Converter;

pub mod csv;
pub mod memory;
pub mod sheet;
pub mod xlsx;

pub use csv::{CsvOptions, CsvSink};
pub use memory::MemoryDocument;
pub use sheet::{Document, Sheet, SheetSink};
pub use xlsx::XlsxDocument;

/// Output buffer size for text sinks
pub const OUTPUT_BUFFER_SIZE: usize = 64 * 1024;

/// Trait for writing scanned rows to an output format
#[async_trait]
pub trait RowSink: Send {
    /// Called once before the first row
    ///
    /// # Arguments
    /// * `columns` - Descriptors of the cursor being streamed
    async fn begin(&mut self, columns: &[ColumnDescriptor]) -> Result<()>;

    /// Write the row currently held by the converters
    async fn write_row(&mut self, row: &[Converter]) -> Result<()>;

    /// Flush buffered output. Called exactly once, even after an error.
    async fn finish(&mut self) -> Result<()>;
}
