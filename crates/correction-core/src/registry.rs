//! Batch registry: creation and error-state transitions of batch records

use regex::Regex;
use correction_types::{BatchHistoryEntry, BatchRecord};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::keys::KeySpace;
use crate::state::{decode_json, WorldState, WorldStateExt};

/// Owns every write to a batch record
///
/// `batchID` and `quantity` are fixed at creation. `productCode` only changes
/// through [`BatchRegistry::apply_correction`], which is crate-private so the
/// correction workflow is its sole caller.
pub struct BatchRegistry {
    keys: KeySpace,
    id_pattern: Regex,
}

impl BatchRegistry {
    pub fn new(keys: KeySpace, id_pattern: Regex) -> Self {
        Self { keys, id_pattern }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(
            KeySpace::new(config.correction_key_prefix.clone()),
            config.batch_id_regex()?,
        ))
    }

    fn validate_batch_id(&self, batch_id: &str) -> Result<()> {
        if batch_id.is_empty() {
            return Err(LedgerError::InvalidArgument("batchID is required".to_string()));
        }
        if !self.id_pattern.is_match(batch_id) || self.keys.is_reserved(batch_id) {
            return Err(LedgerError::InvalidArgument(format!("batchID '{}' is not a valid batch id", batch_id)));
        }
        Ok(())
    }

    fn load<W: WorldState + ?Sized>(&self, state: &mut W, batch_id: &str) -> Result<BatchRecord> {
        // Bookkeeping keys are never batches, whatever is stored under them
        if self.keys.is_reserved(batch_id) {
            return Err(LedgerError::NotFound(format!("batch {} does not exist", batch_id)));
        }
        state
            .get_json::<BatchRecord>(&self.keys.batch_key(batch_id))?
            .ok_or_else(|| LedgerError::NotFound(format!("batch {} does not exist", batch_id)))
    }

    fn store<W: WorldState + ?Sized>(&self, state: &mut W, batch: &BatchRecord) -> Result<()> {
        state.put_json(&self.keys.batch_key(&batch.batch_id), batch)
    }

    /// Record a newly manufactured batch
    pub fn create_batch<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
        product_code: &str,
        quantity: u64,
    ) -> Result<BatchRecord> {
        self.validate_batch_id(batch_id)?;
        if product_code.is_empty() {
            return Err(LedgerError::InvalidArgument("productCode is required".to_string()));
        }

        if state.get(&self.keys.batch_key(batch_id))?.is_some() {
            return Err(LedgerError::AlreadyExists(format!("batch {} already exists", batch_id)));
        }

        let batch = BatchRecord::new(batch_id.to_string(), product_code.to_string(), quantity);
        self.store(state, &batch)?;

        log::info!("Created batch {} ({} x {}) in tx {}", batch_id, quantity, product_code, state.tx_id());
        Ok(batch)
    }

    /// Flag a batch as erroneous, replacing any earlier error description
    pub fn flag_error<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
        error_details: &str,
    ) -> Result<BatchRecord> {
        let mut batch = self.load(state, batch_id)?;

        if error_details.trim().is_empty() {
            return Err(LedgerError::InvalidArgument("errorDetails is required".to_string()));
        }

        if batch.flagged_erroneous {
            log::warn!("Batch {} already flagged, replacing error details", batch_id);
        }

        batch.flagged_erroneous = true;
        batch.error_details = error_details.to_string();
        self.store(state, &batch)?;

        log::info!("Flagged batch {} as erroneous in tx {}", batch_id, state.tx_id());
        Ok(batch)
    }

    /// Replace the product code and clear the error state
    pub(crate) fn apply_correction<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
        new_product_code: &str,
    ) -> Result<BatchRecord> {
        let mut batch = self.load(state, batch_id)?;

        let previous = std::mem::replace(&mut batch.product_code, new_product_code.to_string());
        batch.flagged_erroneous = false;
        batch.error_details.clear();
        self.store(state, &batch)?;

        log::info!(
            "Corrected batch {} product code {} -> {} in tx {}",
            batch_id, previous, new_product_code, state.tx_id()
        );
        Ok(batch)
    }

    /// Current snapshot of a batch
    pub fn get_batch<W: WorldState + ?Sized>(&self, state: &mut W, batch_id: &str) -> Result<BatchRecord> {
        self.load(state, batch_id)
    }

    pub fn batch_exists<W: WorldState + ?Sized>(&self, state: &mut W, batch_id: &str) -> Result<bool> {
        if self.keys.is_reserved(batch_id) {
            return Ok(false);
        }
        Ok(state.get(&self.keys.batch_key(batch_id))?.is_some())
    }

    /// Every committed version of a batch, oldest first
    pub fn get_batch_history<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
    ) -> Result<Vec<BatchHistoryEntry>> {
        self.load(state, batch_id)?;

        let key = self.keys.batch_key(batch_id);
        state
            .history(&key)?
            .into_iter()
            .map(|modification| {
                Ok(BatchHistoryEntry {
                    record: decode_json(&key, &modification.value)?,
                    tx_id: modification.tx_id,
                    version: modification.version,
                    timestamp: modification.timestamp,
                })
            })
            .collect()
    }
}
