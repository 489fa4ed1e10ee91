//! csvdump
//!
//! Dumps the result of a SQL query as CSV, or the results of several queries
//! as the sheets of one `.xlsx` workbook.
//!
//! # Usage
//!
//! ```bash
//! # SELECT * FROM users WHERE active = 1, as CSV on stdout
//! csvdump --connect sqlite://app.db users 'active = 1'
//!
//! # Two sheets in one workbook
//! csvdump --connect sqlite://app.db -o report.xlsx \
//!     --sheet 'Users:SELECT * FROM users' --sheet 'SELECT * FROM orders'
//!
//! # Latin-1 CSV, gzipped
//! csvdump --connect sqlite://app.db --encoding latin1 --compress gz -o users.csv.gz users
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use csvdump::cli::{CliInterface, DumpPlan};
use csvdump::error::Result;
use csvdump::export::{ExportCoordinator, XlsxDocument, finish_output, open_output};
use csvdump::query::{QueryRequest, read_query};
use csvdump::source::SqliteDatabase;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Resolve the query and open the output
/// 4. Connect and dump
///
/// # Returns
/// * `Result<()>` - Success or error
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    let plan = cli.plan()?;

    let url = cli.connection_url()?;
    let db = SqliteDatabase::connect(&url).await?;
    let options = cli.export_options()?;
    let layout = Arc::clone(&options.layout);
    let coordinator = ExportCoordinator::new(options).with_cancellation(cancel_on_ctrl_c());

    let mut output = open_output(cli.output_path(), cli.config().compression()?).await?;
    match plan {
        DumpPlan::Sheets(specs) => {
            // Closing the workbook finishes the output
            let document = XlsxDocument::new(output, &layout);
            let reports = coordinator.dump_sheets(&db, &specs, Box::new(document)).await?;
            let rows: u64 = reports.iter().map(|r| r.summary.rows).sum();
            info!("Wrote {} sheets, {} rows", reports.len(), rows);
        }
        DumpPlan::Query(request) => {
            coordinator.dump_csv(&db, &request, &mut output).await?;
            finish_output(&mut output).await?;
        }
        DumpPlan::Stdin => {
            let request = QueryRequest::Sql(read_query(tokio::io::stdin()).await?);
            coordinator.dump_csv(&db, &request, &mut output).await?;
            finish_output(&mut output).await?;
        }
    }

    db.pool().close().await;
    Ok(())
}

/// Cancellation token fired by Ctrl+C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => cancel.cancel(),
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });
    token
}

/// Initialize logging system based on verbosity level
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    // Logs go to stderr: stdout may carry the dump itself
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
