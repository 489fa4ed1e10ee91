//! Dump engine
//!
//! - `converter`: per-column value holders and their text forms
//! - `streaming`: the cursor-to-sink row loop
//! - `writers`: CSV and sheet sinks
//! - `coordinator`: transaction handling and multi-sheet fan-out
//! - `output`: output files and compression
//! - `progress`: row counters and the optional spinner

pub mod converter;
pub mod coordinator;
pub mod output;
pub mod progress;
pub mod streaming;
pub mod writers;

pub use converter::{Converter, ConverterFactory, DateLayout};
pub use coordinator::{ExportCoordinator, ExportOptions, SheetReport};
pub use output::{Compression, Output, finish_output, open_output};
pub use progress::{DumpSummary, ProgressTracker};
pub use streaming::RowStreamer;
pub use writers::{CsvOptions, CsvSink, Document, MemoryDocument, RowSink, Sheet, XlsxDocument};
