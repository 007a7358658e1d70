//! JSON payloads on top of the byte-oriented world state

use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::error::{LedgerError, Result};
use super::traits::WorldState;

/// Decode a stored payload; malformed data is fatal, never retried
pub fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::SerializationFailure(format!("Malformed payload at key {}: {}", key, e)))
}

pub trait WorldStateExt: WorldState {
    fn get_json<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => decode_json(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| LedgerError::SerializationFailure(format!("Failed to serialize {}: {}", key, e)))?;
        self.put(key, bytes)
    }
}

impl<W: WorldState + ?Sized> WorldStateExt for W {}
