//! csvdump library
//!
//! Streams the rows of SQL cursors into CSV text or into the sheets of a
//! multi-sheet document, with per-column typed conversion and a single
//! shared read-only transaction per run.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Converters, row streaming, sinks and the coordinator
//! - `query`: Query construction from command-line input
//! - `source`: Database, transaction and cursor abstractions with SQLite and
//!   in-memory backends
//!
//! # Example
//!
//! ```no_run
//! use csvdump::export::{ExportCoordinator, ExportOptions};
//! use csvdump::query::QueryRequest;
//! use csvdump::source::SqliteDatabase;
//!
//! #[tokio::main]
//! async fn main() -> csvdump::Result<()> {
//!     let db = SqliteDatabase::connect("sqlite://app.db").await?;
//!     let coordinator = ExportCoordinator::new(ExportOptions::default());
//!     let request = QueryRequest::Sql("SELECT * FROM users".to_string());
//!
//!     let summary = coordinator.dump_csv(&db, &request, tokio::io::stdout()).await?;
//!     eprintln!("{} rows", summary.rows);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod query;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use error::{DumpError, Result};
pub use export::{ExportCoordinator, ExportOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
