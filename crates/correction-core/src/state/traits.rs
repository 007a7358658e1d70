//! Storage seams between the contract, the transaction overlay and the host store

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use correction_types::{CallerIdentity, TxRecord};
use crate::error::Result;
use super::snapshot::base64_bytes;

/// Commit sequence number; every committed write set gets the next one
pub type Version = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: Version,
}

/// One historical write to a key, oldest first in history listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

/// Everything a transaction observed and wants to write
#[derive(Debug, Clone)]
pub struct CommitBatch {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    /// Version seen for each key read; None means the key was absent
    pub reads: BTreeMap<String, Option<Version>>,
    pub writes: BTreeMap<String, Vec<u8>>,
}

/// Host-side versioned store
///
/// `apply` must validate the read set against committed versions and either
/// write the whole batch or nothing.
pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Committed entries whose key starts with `prefix`, in key order
    fn scan(&self, prefix: &str) -> Result<Vec<(String, VersionedValue)>>;

    fn history(&self, key: &str) -> Result<Vec<KeyModification>>;

    fn apply(&self, batch: CommitBatch) -> Result<Version>;

    fn record_transaction(&self, record: TxRecord) -> Result<()>;

    fn transactions(&self) -> Result<Vec<TxRecord>>;
}

/// What contract code sees of the world state inside one transaction
pub trait WorldState {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Committed write history of `key`; pending writes are not included
    fn history(&self, key: &str) -> Result<Vec<KeyModification>>;

    fn tx_id(&self) -> &str;

    fn timestamp(&self) -> DateTime<Utc>;

    fn caller(&self) -> &CallerIdentity;
}
