//! Error types for the batch correction ledger

use correction_types::ErrorKind;
use thiserror::Error;

/// Main error type for all ledger operations
///
/// Every variant maps onto exactly one wire-level [`ErrorKind`] so an aborted
/// transaction can always be explained after the fact.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already applied: {0}")]
    AlreadyApplied(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("MVCC read conflict on key {key}: read version {read:?}, committed version {committed:?}")]
    MvccConflict {
        key: String,
        read: Option<u64>,
        committed: Option<u64>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Wire-level kind reported in receipts and the transaction log
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AlreadyApplied(_) => ErrorKind::AlreadyApplied,
            Self::SerializationFailure(_) => ErrorKind::SerializationFailure,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::MvccConflict { .. } => ErrorKind::MvccConflict,
            Self::Storage(_) | Self::Config(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
