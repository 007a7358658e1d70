//! Volatile world state, used by tests and single-process runs

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use correction_types::TxRecord;
use crate::error::{LedgerError, Result};
use super::snapshot::Snapshot;
use super::traits::{CommitBatch, KeyModification, StateStore, Version, VersionedValue};

#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Snapshot>> {
        self.snapshot
            .read()
            .map_err(|_| LedgerError::Storage("world state lock poisoned".to_string()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Snapshot>> {
        self.snapshot
            .write()
            .map_err(|_| LedgerError::Storage("world state lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<VersionedValue>> {
        Ok(self.read_guard()?.read(key))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, VersionedValue)>> {
        Ok(self.read_guard()?.scan(prefix))
    }

    fn history(&self, key: &str) -> Result<Vec<KeyModification>> {
        Ok(self.read_guard()?.history(key))
    }

    fn apply(&self, batch: CommitBatch) -> Result<Version> {
        self.write_guard()?.apply(batch)
    }

    fn record_transaction(&self, record: TxRecord) -> Result<()> {
        self.write_guard()?.transactions.push(record);
        Ok(())
    }

    fn transactions(&self) -> Result<Vec<TxRecord>> {
        Ok(self.read_guard()?.transactions.clone())
    }
}
