//! In-memory image of the world state shared by the memory and file stores

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use correction_types::TxRecord;
use crate::error::{LedgerError, Result};
use super::traits::{CommitBatch, KeyModification, Version, VersionedValue};

/// Stored values are opaque bytes; on disk they are base64 strings
pub(crate) mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub version: Version,
    #[serde(default)]
    pub history: Vec<KeyModification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub last_version: Version,
    #[serde(default)]
    pub entries: BTreeMap<String, Entry>,
    #[serde(default)]
    pub transactions: Vec<TxRecord>,
}

impl Snapshot {
    pub fn read(&self, key: &str) -> Option<VersionedValue> {
        self.entries.get(key).map(|entry| VersionedValue {
            value: entry.value.clone(),
            version: entry.version,
        })
    }

    pub fn scan(&self, prefix: &str) -> Vec<(String, VersionedValue)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    VersionedValue {
                        value: entry.value.clone(),
                        version: entry.version,
                    },
                )
            })
            .collect()
    }

    pub fn history(&self, key: &str) -> Vec<KeyModification> {
        self.entries
            .get(key)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    /// Reject the batch if any key it read has been committed since
    pub fn validate(&self, batch: &CommitBatch) -> Result<()> {
        for (key, read_version) in &batch.reads {
            let committed = self.entries.get(key).map(|entry| entry.version);
            if committed != *read_version {
                return Err(LedgerError::MvccConflict {
                    key: key.clone(),
                    read: *read_version,
                    committed,
                });
            }
        }
        Ok(())
    }

    /// Validate and write the batch; a batch without writes commits nothing
    pub fn apply(&mut self, batch: CommitBatch) -> Result<Version> {
        self.validate(&batch)?;

        if batch.writes.is_empty() {
            return Ok(self.last_version);
        }

        let version = self.last_version + 1;

        for (key, value) in batch.writes {
            let modification = KeyModification {
                tx_id: batch.tx_id.clone(),
                version,
                timestamp: batch.timestamp,
                value: value.clone(),
            };

            let entry = self.entries.entry(key).or_insert_with(|| Entry {
                value: Vec::new(),
                version,
                history: Vec::new(),
            });
            entry.value = value;
            entry.version = version;
            entry.history.push(modification);
        }

        self.last_version = version;
        Ok(version)
    }
}
