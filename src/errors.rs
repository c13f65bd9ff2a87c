//! Error types for the matchwager ledger
//!
//! Business-rule failures, storage failures and configuration failures are
//! kept apart so callers can tell an expected rejection from a transient fault.

use thiserror::Error;

/// Root error type for all ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Storage system errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Business-rule rejections of a wager or settlement
    #[error("Wager error: {0}")]
    Wager(#[from] WagerError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Storage system errors. Every variant is surfaced to users as a generic
/// "store unavailable" failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Expected business outcomes returned to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WagerError {
    #[error("Subject {subject_id} is not currently in an active match")]
    NoActiveMatch { subject_id: String },

    #[error("Subject {0} is not tracked in this community")]
    UnknownSubject(String),

    #[error("No tracked subjects in this community")]
    NoTrackedSubjects,

    #[error("Multiple tracked subjects, specify one of: {}", .candidates.join(", "))]
    AmbiguousSubject { candidates: Vec<String> },

    #[error("Match {0} not found")]
    UnknownMatch(String),

    #[error("Betting is closed for match {match_id}")]
    WindowClosed { match_id: String },

    #[error("Insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("Wager amount must be positive")]
    InvalidAmount,

    #[error("Match {match_id} was already settled")]
    DuplicateSettlement { match_id: String },
}

impl WagerError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            WagerError::NoActiveMatch { .. } => "NO_ACTIVE_MATCH",
            WagerError::UnknownSubject(_) => "UNKNOWN_SUBJECT",
            WagerError::NoTrackedSubjects => "NO_TRACKED_SUBJECTS",
            WagerError::AmbiguousSubject { .. } => "AMBIGUOUS_SUBJECT",
            WagerError::UnknownMatch(_) => "UNKNOWN_MATCH",
            WagerError::WindowClosed { .. } => "WINDOW_CLOSED",
            WagerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WagerError::InvalidAmount => "INVALID_AMOUNT",
            WagerError::DuplicateSettlement { .. } => "DUPLICATE_SETTLEMENT",
        }
    }
}

impl LedgerError {
    /// Borrow the wager error, if this is one
    pub fn as_wager(&self) -> Option<&WagerError> {
        match self {
            LedgerError::Wager(e) => Some(e),
            _ => None,
        }
    }
}

// External error conversions
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                LedgerError::Storage(StorageError::DatabaseOpenFailed(e.to_string()))
            }
            _ => LedgerError::Storage(StorageError::ReadFailed(e.to_string())),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

// Convenience type alias for Results
pub type LedgerResult<T> = Result<T, LedgerError>;
