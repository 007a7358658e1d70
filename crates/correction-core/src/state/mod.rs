//! World state: the versioned key-value store the contract runs against

pub mod codec;
pub mod file;
pub mod memory;
pub mod snapshot;
pub mod traits;
pub mod transaction;

pub use codec::{decode_json, WorldStateExt};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{CommitBatch, KeyModification, StateStore, Version, VersionedValue, WorldState};
pub use transaction::Transaction;

#[cfg(test)]
pub(crate) fn test_transaction<'a>(
    store: &'a MemoryStore,
    tx_id: &str,
    caller: correction_types::CallerIdentity,
) -> Transaction<'a, MemoryStore> {
    Transaction::new(store, tx_id.to_string(), chrono::Utc::now(), caller)
}
