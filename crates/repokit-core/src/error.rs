//! Error types for Repokit

use thiserror::Error;

/// Result type alias using Repokit's Error
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes inspected when classifying sqlx errors
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_CONSTRAINT: &str = "19";

/// Coarse classification of an [`Error`], independent of the backend that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Blank identifier or otherwise unusable argument; raised before any I/O
    InvalidArgument,
    /// The requested item does not exist
    NotFound,
    /// Duplicate identifier on insert
    Conflict,
    /// Safe to retry (lock contention, pool timeout, I/O hiccup)
    Transient,
    /// Model/record conversion failed
    Conversion,
    /// The adapter does not implement the requested operation
    Unsupported,
    /// The connection backing the repository has been closed
    ConnectionClosed,
    /// Any other storage failure
    Storage,
}

/// Repokit error types
#[derive(Error, Debug)]
pub enum Error {
    // Argument errors (R001-R099)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Item errors (R100-R199)
    #[error("Item with id '{id}' was not found")]
    NotFound { id: String },

    #[error("Item with id '{id}' already exists")]
    Conflict { id: String },

    // Conversion errors (R200-R299)
    #[error("Conversion failed: {0}")]
    Conversion(String),

    // Contract errors (R300-R399)
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    // Connection errors (R400-R499)
    #[error("Connection is closed. Call setup() on the owning context to reopen it.")]
    ConnectionClosed,

    #[error("Table '{table}' does not exist")]
    TableMissing { table: String },

    #[error("Transient storage failure: {0}")]
    Transient(String),

    // Backend errors (R500-R599)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found<T: Into<String>>(id: T) -> Self {
        Error::NotFound { id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<T: Into<String>>(id: T) -> Self {
        Error::Conflict { id: id.into() }
    }

    /// Create a conversion error
    pub fn conversion<T: Into<String>>(msg: T) -> Self {
        Error::Conversion(msg.into())
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "R001",
            Self::NotFound { .. } => "R100",
            Self::Conflict { .. } => "R101",
            Self::Conversion(_) => "R200",
            Self::Unsupported { .. } => "R300",
            Self::ConnectionClosed => "R400",
            Self::TableMissing { .. } => "R401",
            Self::Transient(_) => "R402",
            Self::DatabaseError(_) => "R500",
            Self::SqliteError(_) => "R501",
            Self::TaskFailed(_) => "R502",
            Self::Io(_) => "R9999",
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Conversion(_) => ErrorKind::Conversion,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::TableMissing { .. } => ErrorKind::Storage,
            Self::Transient(_) => ErrorKind::Transient,
            Self::DatabaseError(err) => classify_sqlx(err),
            Self::SqliteError(err) => classify_rusqlite(err),
            Self::TaskFailed(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// Whether the retry policy may re-run the failed operation
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

fn classify_sqlx(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::Transient,
        sqlx::Error::PoolClosed => ErrorKind::ConnectionClosed,
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return ErrorKind::Conflict;
            }
            // Extended codes (e.g. 517 SQLITE_BUSY_SNAPSHOT) share the primary code in the low byte
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| (code & 0xff).to_string());
            match primary.as_deref() {
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => ErrorKind::Transient,
                Some(SQLITE_CONSTRAINT) => ErrorKind::Conflict,
                _ => ErrorKind::Storage,
            }
        }
        _ => ErrorKind::Storage,
    }
}

fn classify_rusqlite(err: &rusqlite::Error) -> ErrorKind {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            ErrorKind::Transient
        }
        Some(rusqlite::ErrorCode::ConstraintViolation) => ErrorKind::Conflict,
        _ => ErrorKind::Storage,
    }
}
