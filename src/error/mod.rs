//! Error handling module for dump runs.
//!
//! Every stage of the pipeline has its own error kind:
//! - query construction (`QueryBuildError`)
//! - cursor open / execute (`DumpError::QueryExecution`)
//! - row scanning (`ScanError`)
//! - CSV and sheet output (`SinkError`)
//! - per-sheet setup (`DumpError::Setup`)
//!
//! # Example
//!
//! ```rust
//! use csvdump::error::{DumpError, Result};
//!
//! fn open() -> Result<()> {
//!     Err(DumpError::execution("SELECT * FROM missing", "no such table"))
//! }
//!
//! assert!(open().is_err());
//! ```

pub mod kinds;

// Re-export commonly used types
pub use kinds::{ConfigError, DumpError, QueryBuildError, Result, ScanError, SinkError};
