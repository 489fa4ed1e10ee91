use std::{fmt, io};

/// Crate-wide `Result` type using [`DumpError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, DumpError>;

/// Top-level error type for dump runs.
///
/// Every failure of a run is reported through this type. The variants mirror
/// the stage of the pipeline that failed, so the single summarized error a
/// user sees names the first failing operation.
#[derive(Debug)]
pub enum DumpError {
    /// Malformed table, WHERE or call-argument input.
    QueryBuild(QueryBuildError),

    /// Cursor open / execute failure.
    QueryExecution {
        /// Query text that failed
        query: String,
        /// Underlying driver message
        cause: String,
    },

    /// Row-to-destination scan failure.
    Scan(ScanError),

    /// Write or append failure at the CSV or sheet boundary.
    Sink(SinkError),

    /// Per-sheet setup failure (header or column discovery).
    Setup {
        /// Sheet name being prepared
        sheet: String,
        /// What went wrong
        cause: Box<DumpError>,
    },

    /// Configuration errors.
    Config(ConfigError),

    /// The run was cancelled.
    Cancelled,

    /// I/O errors.
    Io(io::Error),

    /// SQL driver errors.
    Database(sqlx::Error),

    /// A sheet task panicked or could not be joined.
    Task(String),
}

/// Query construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryBuildError {
    /// No table name although a WHERE clause or column list was given.
    MissingTable,

    /// Call mode without a routine name.
    MissingRoutine,

    /// Call argument with an empty name (e.g. `=5`).
    InvalidArgument(String),
}

/// Scan failure, carrying a snapshot of the destination kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    /// Underlying cause
    pub cause: String,
    /// Destination kinds in column order at the time of the failure
    pub destinations: Vec<&'static str>,
}

/// Sink-specific errors.
#[derive(Debug)]
pub enum SinkError {
    /// Writing CSV output failed.
    Write(io::Error),

    /// Appending a row to a sheet failed.
    Append { sheet: String, cause: String },

    /// Creating a sheet failed.
    NewSheet { sheet: String, cause: String },

    /// Closing a sheet or document failed.
    Close(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::QueryBuild(e) => write!(f, "Query build error: {e}"),
            DumpError::QueryExecution { query, cause } => write!(f, "{query:?}: {cause}"),
            DumpError::Scan(e) => write!(f, "{e}"),
            DumpError::Sink(e) => write!(f, "Output error: {e}"),
            DumpError::Setup { sheet, cause } => write!(f, "Sheet {sheet:?}: {cause}"),
            DumpError::Config(e) => write!(f, "Configuration error: {e}"),
            DumpError::Cancelled => write!(f, "Cancelled"),
            DumpError::Io(e) => write!(f, "I/O error: {e}"),
            DumpError::Database(e) => write!(f, "Database error: {e}"),
            DumpError::Task(msg) => write!(f, "Sheet task failed: {msg}"),
        }
    }
}

impl fmt::Display for QueryBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryBuildError::MissingTable => {
                write!(f, "a table name is required with a WHERE clause or column list")
            }
            QueryBuildError::MissingRoutine => write!(f, "call mode needs a routine name"),
            QueryBuildError::InvalidArgument(arg) => {
                write!(f, "invalid call argument {arg:?}, expected name=value")
            }
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan into [{}]: {}", self.destinations.join(", "), self.cause)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Write(e) => write!(f, "write failed: {e}"),
            SinkError::Append { sheet, cause } => {
                write!(f, "append to sheet {sheet:?} failed: {cause}")
            }
            SinkError::NewSheet { sheet, cause } => {
                write!(f, "creating sheet {sheet:?} failed: {cause}")
            }
            SinkError::Close(msg) => write!(f, "close failed: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for DumpError {}
impl std::error::Error for QueryBuildError {}
impl std::error::Error for ScanError {}
impl std::error::Error for SinkError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to DumpError ========================= */

impl From<io::Error> for DumpError {
    fn from(err: io::Error) -> Self {
        DumpError::Io(err)
    }
}

impl From<sqlx::Error> for DumpError {
    fn from(err: sqlx::Error) -> Self {
        DumpError::Database(err)
    }
}

impl From<QueryBuildError> for DumpError {
    fn from(err: QueryBuildError) -> Self {
        DumpError::QueryBuild(err)
    }
}

impl From<ScanError> for DumpError {
    fn from(err: ScanError) -> Self {
        DumpError::Scan(err)
    }
}

impl From<SinkError> for DumpError {
    fn from(err: SinkError) -> Self {
        DumpError::Sink(err)
    }
}

impl From<ConfigError> for DumpError {
    fn from(err: ConfigError) -> Self {
        DumpError::Config(err)
    }
}

impl DumpError {
    /// Wrap a driver failure for `query`.
    pub fn execution(query: &str, cause: impl fmt::Display) -> Self {
        DumpError::QueryExecution {
            query: query.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Attach the sheet name to a setup-time failure.
    pub fn setup(sheet: &str, cause: DumpError) -> Self {
        DumpError::Setup {
            sheet: sheet.to_string(),
            cause: Box::new(cause),
        }
    }
}
