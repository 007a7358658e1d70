//! Transaction overlay over a host store

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use correction_types::CallerIdentity;
use crate::error::Result;
use super::traits::{CommitBatch, KeyModification, StateStore, Version, WorldState};

/// Buffers writes and records the version of every key read
///
/// Reads see this transaction's own pending writes. Nothing reaches the store
/// until [`Transaction::commit`]; dropping the transaction discards it.
pub struct Transaction<'a, S: StateStore + ?Sized> {
    store: &'a S,
    tx_id: String,
    timestamp: DateTime<Utc>,
    caller: CallerIdentity,
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, Vec<u8>>,
}

impl<'a, S: StateStore + ?Sized> Transaction<'a, S> {
    pub fn new(store: &'a S, tx_id: String, timestamp: DateTime<Utc>, caller: CallerIdentity) -> Self {
        Self {
            store,
            tx_id,
            timestamp,
            caller,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn into_commit_batch(self) -> CommitBatch {
        CommitBatch {
            tx_id: self.tx_id,
            timestamp: self.timestamp,
            reads: self.reads,
            writes: self.writes,
        }
    }

    /// Validate the read set and write everything atomically
    pub fn commit(self) -> Result<Version> {
        let store = self.store;
        store.apply(self.into_commit_batch())
    }

    fn observe(&mut self, key: &str, version: Option<Version>) {
        self.reads.entry(key.to_string()).or_insert(version);
    }
}

impl<'a, S: StateStore + ?Sized> WorldState for Transaction<'a, S> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(Some(pending.clone()));
        }

        let committed = self.store.read(key)?;
        log::debug!("tx {} read {} (version {:?})", self.tx_id, key, committed.as_ref().map(|v| v.version));
        self.observe(key, committed.as_ref().map(|v| v.version));

        Ok(committed.map(|v| v.value))
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.writes.insert(key.to_string(), value);
        Ok(())
    }

    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut merged = BTreeMap::new();

        for (key, committed) in self.store.scan(prefix)? {
            self.observe(&key, Some(committed.version));
            merged.insert(key, committed.value);
        }

        for (key, pending) in self.writes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.clone(), pending.clone());
        }

        Ok(merged.into_iter().collect())
    }

    fn history(&self, key: &str) -> Result<Vec<KeyModification>> {
        self.store.history(key)
    }

    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn caller(&self) -> &CallerIdentity {
        &self.caller
    }
}
