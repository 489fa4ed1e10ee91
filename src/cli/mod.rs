//! Command-line interface for csvdump
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and CLI overrides
//! - Connection string resolution
//! - Mode selection (single CSV query, call block, stdin, multi-sheet)

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::export::ExportOptions;
use crate::query::{QueryRequest, SheetSpec, build_call, build_query, parse_sheet_spec};

/// Environment variables consulted for the connection string, in order
pub const CONNECTION_ENV_VARS: [&str; 2] = ["DB_ID", "BRUNO_ID"];

/// csvdump - dump query results as CSV or spreadsheet sheets
#[derive(Parser, Debug, Default)]
#[command(
    name = "csvdump",
    version,
    about = "Dump SQL query results as CSV or as sheets of a spreadsheet",
    long_about = "Dump SQL query results as CSV or as sheets of a spreadsheet.

    csvdump [options] 'T_able' 'F_ield=1'

executes \"SELECT * FROM T_able WHERE F_ield=1\" and dumps all the columns;

    csvdump --call [options] 'DB_lista.csv' 'p_a=1' 'p_b=c'

executes \"BEGIN :1 := DB_lista.csv(p_a=>:2, p_b=>:3); END;\" with p_a=1, p_b=c
and dumps all the columns of the cursor returned by the routine.

Without arguments the query is read from standard input."
)]
pub struct CliArgs {
    /// Table (or full SELECT), then WHERE clause, then columns.
    /// With --call: routine, then name=value arguments.
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// Connection string (defaults to $DB_ID, then $BRUNO_ID, then the config file)
    #[arg(long, value_name = "URL")]
    pub connect: Option<String>,

    /// Date format, in strftime notation
    #[arg(long = "date", value_name = "FORMAT")]
    pub date_format: Option<String>,

    /// Field separator
    #[arg(long = "sep", value_name = "SEP")]
    pub separator: Option<String>,

    /// Do not print the header line
    #[arg(long = "no-header")]
    pub no_header: bool,

    /// Not real CSV, just dump the raw data
    #[arg(long)]
    pub raw: bool,

    /// The first argument is a routine returning a cursor, the rest are its arguments
    #[arg(long)]
    pub call: bool,

    /// Each --sheet=name:SELECT becomes a separate sheet of the output workbook
    #[arg(long = "sheet", value_name = "NAME:QUERY")]
    pub sheets: Vec<String>,

    /// Character encoding of CSV output, e.g. windows-1252
    #[arg(long, value_name = "ENCODING")]
    pub encoding: Option<String>,

    /// Compress output with gz/gzip or zst/zstd/zstandard
    #[arg(long, value_name = "FORMAT")]
    pub compress: Option<String>,

    /// Output file ("-" for stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "-")]
    pub output: String,

    /// Maximum number of sheets dumped at the same time
    #[arg(long, value_name = "N")]
    pub max_concurrent_sheets: Option<usize>,

    /// Show a progress spinner on stderr
    #[arg(long)]
    pub progress: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,
}

/// What a run dumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpPlan {
    /// One sheet per `--sheet` argument
    Sheets(Vec<SheetSpec>),
    /// A single query written as CSV
    Query(QueryRequest),
    /// A single query read from standard input, written as CSV
    Stdin,
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse the process arguments and load the configuration
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build the interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, &args);
        config.validate()?;
        Ok(Self { args, config })
    }

    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        if let Some(ref sep) = args.separator {
            config.output.separator = sep.clone();
        }
        if let Some(ref date) = args.date_format {
            config.output.date_format = date.clone();
        }
        if args.no_header {
            config.output.header = false;
        }
        if args.raw {
            config.output.raw = true;
        }
        if args.progress {
            config.output.progress = true;
        }
        if let Some(ref encoding) = args.encoding {
            config.output.encoding = encoding.clone();
        }
        if let Some(ref compress) = args.compress {
            config.output.compress = compress.clone();
        }
        if args.max_concurrent_sheets.is_some() {
            config.export.max_concurrent_sheets = args.max_concurrent_sheets;
        }
    }

    /// Get the configuration (with CLI overrides applied)
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Dump settings for this run
    pub fn export_options(&self) -> Result<ExportOptions> {
        self.config.export_options()
    }

    /// Resolve the connection string.
    ///
    /// Priority:
    /// 1. `--connect`
    /// 2. `$DB_ID`, then `$BRUNO_ID`
    /// 3. `[database] url` from the config file
    pub fn connection_url(&self) -> Result<String> {
        resolve_connection(
            self.args.connect.as_deref(),
            |name| std::env::var(name).ok(),
            &self.config,
        )
    }

    /// Decide what to dump from the positional arguments and flags
    pub fn plan(&self) -> Result<DumpPlan> {
        build_plan(&self.args)
    }

    /// Output file, or `None` for stdout
    pub fn output_path(&self) -> Option<&Path> {
        match self.args.output.as_str() {
            "" | "-" => None,
            path => Some(Path::new(path)),
        }
    }
}

/// Pick the first non-empty connection string from flag, environment and config
pub fn resolve_connection<F>(flag: Option<&str>, env: F, config: &Config) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    flag.map(str::to_string)
        .filter(|url| !url.is_empty())
        .or_else(|| {
            CONNECTION_ENV_VARS
                .iter()
                .filter_map(|name| env(*name))
                .find(|url| !url.is_empty())
        })
        .or_else(|| config.database.url.clone().filter(|url| !url.is_empty()))
        .ok_or_else(|| ConfigError::MissingField("connection string (--connect, $DB_ID or [database] url)".to_string()).into())
}

fn build_plan(args: &CliArgs) -> Result<DumpPlan> {
    if !args.sheets.is_empty() {
        return Ok(DumpPlan::Sheets(args.sheets.iter().map(|s| parse_sheet_spec(s)).collect()));
    }

    if args.call {
        let (routine, call_args) = args.args.split_first().map_or(("", &[][..]), |(r, rest)| (r.as_str(), rest));
        return Ok(DumpPlan::Query(QueryRequest::Call(build_call(routine, call_args)?)));
    }

    match args.args.as_slice() {
        [] => Ok(DumpPlan::Stdin),
        [table] => Ok(DumpPlan::Query(QueryRequest::Sql(build_query(table, None, &[])?))),
        [table, filter, columns @ ..] => Ok(DumpPlan::Query(QueryRequest::Sql(build_query(
            table,
            Some(filter.as_str()),
            columns,
        )?))),
    }
}
