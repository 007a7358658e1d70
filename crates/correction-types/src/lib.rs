//! Shared types for the batch correction ledger
//!
//! Everything in here crosses the contract boundary as UTF-8 JSON, so the
//! serde field names are part of the external interface.

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

/// Current snapshot of a manufacturing batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    #[serde(rename = "batchID")]
    pub batch_id: String,
    pub product_code: String,
    pub quantity: u64,
    pub flagged_erroneous: bool,
    pub error_details: String,
}

impl BatchRecord {
    /// Create a freshly manufactured, unflagged batch
    pub fn new(batch_id: String, product_code: String, quantity: u64) -> Self {
        Self {
            batch_id,
            product_code,
            quantity,
            flagged_erroneous: false,
            error_details: String::new(),
        }
    }

    /// `errorDetails` is non-empty exactly when the batch is flagged
    pub fn is_consistent(&self) -> bool {
        self.flagged_erroneous == !self.error_details.is_empty()
    }
}

/// A recorded request to replace a batch's product code
///
/// Content fields are write-once. The `consumed*` fields are set exactly once,
/// by the transaction that applies the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    #[serde(rename = "batchID")]
    pub batch_id: String,
    pub sequence: u64,
    pub incorrect_value: String,
    pub proposed_value: String,
    pub approved_by: String,
    pub approval_evidence: String,
    pub requested_by: String,
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed: bool,
    #[serde(rename = "consumedTxID", default, skip_serializing_if = "Option::is_none")]
    pub consumed_tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    /// Replaced by a newer request before being applied; derived when listing, never stored
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub superseded: bool,
}

/// Per-batch bookkeeping for correction requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionIndex {
    #[serde(rename = "batchID")]
    pub batch_id: String,
    pub request_count: u64,
    pub pending_sequence: Option<u64>,
}

impl CorrectionIndex {
    pub fn new(batch_id: String) -> Self {
        Self {
            batch_id,
            request_count: 0,
            pending_sequence: None,
        }
    }
}

/// Derived position of a batch in the correction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionState {
    Clean,
    Flagged,
    RequestPending,
}

/// Answer to a correction status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionStatus {
    #[serde(rename = "batchID")]
    pub batch_id: String,
    pub state: CorrectionState,
    pub pending_sequence: Option<u64>,
    pub request_count: u64,
}

/// One committed version of a batch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHistoryEntry {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub record: BatchRecord,
}

/// Verified identity of the submitter of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            id: id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// A transaction proposal as submitted to the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub tx_id: Option<String>,
    pub caller: CallerIdentity,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Proposal {
    pub fn new(caller: CallerIdentity, function: &str, args: &[&str]) -> Self {
        Self {
            tx_id: None,
            caller,
            function: function.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Distinguishable failure kinds surfaced at the transaction boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    AlreadyApplied,
    SerializationFailure,
    Unauthorized,
    MvccConflict,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::InvalidArgument => "InvalidArgument",
            Self::AlreadyApplied => "AlreadyApplied",
            Self::SerializationFailure => "SerializationFailure",
            Self::Unauthorized => "Unauthorized",
            Self::MvccConflict => "MvccConflict",
            Self::Storage => "Storage",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Committed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Returned to the submitter of a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: String,
    pub function: String,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TxError>,
}

impl TxReceipt {
    pub fn is_committed(&self) -> bool {
        self.status == TxStatus::Committed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Entry of the host's transaction log, kept for committed and aborted attempts alike
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_id: String,
    pub function: String,
    pub caller_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TxError>,
}
