//! World state persisted as a JSON snapshot file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use correction_types::TxRecord;
use crate::error::{LedgerError, Result};
use super::snapshot::Snapshot;
use super::traits::{CommitBatch, KeyModification, StateStore, Version, VersionedValue};

/// File-backed store
///
/// Every commit rewrites the snapshot through a temporary file and a rename,
/// so a crash leaves either the old or the new state on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl FileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let snapshot = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).map_err(|e| {
                LedgerError::SerializationFailure(format!(
                    "Failed to deserialize world state {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Snapshot::default()
        };

        log::info!(
            "Opened world state at {} ({} keys, version {})",
            path.display(),
            snapshot.entries.len(),
            snapshot.last_version
        );

        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
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

    /// Write snapshot to disk
    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| LedgerError::SerializationFailure(format!("Failed to serialize world state: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    /// Run `change` on a copy and only swap it in once it is on disk
    fn update<T>(&self, change: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.write_guard()?;
        let mut next = guard.clone();

        let result = change(&mut next)?;
        self.persist(&next)?;
        *guard = next;

        Ok(result)
    }
}

impl StateStore for FileStore {
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
        // Read-only transactions leave the file untouched
        if batch.writes.is_empty() {
            let snapshot = self.read_guard()?;
            snapshot.validate(&batch)?;
            return Ok(snapshot.last_version);
        }
        self.update(|snapshot| snapshot.apply(batch))
    }

    fn record_transaction(&self, record: TxRecord) -> Result<()> {
        self.update(|snapshot| {
            snapshot.transactions.push(record);
            Ok(())
        })
    }

    fn transactions(&self) -> Result<Vec<TxRecord>> {
        Ok(self.read_guard()?.transactions.clone())
    }
}
