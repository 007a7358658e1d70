//! Correction workflow: the request -> apply protocol over batch records
//!
//! Per batch the workflow moves `Clean -> Flagged -> RequestPending -> Clean`.
//! Requests are stored under `(batchID, sequence)` and never removed; applying
//! one sets its `consumed` marker in the same transaction that rewrites the
//! batch, so a second application fails with `AlreadyApplied`.

use correction_types::{BatchRecord, CorrectionIndex, CorrectionRequest, CorrectionState, CorrectionStatus};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::keys::KeySpace;
use crate::registry::BatchRegistry;
use crate::state::{decode_json, WorldState, WorldStateExt};

pub struct CorrectionWorkflow {
    keys: KeySpace,
    registry: BatchRegistry,
    verify_incorrect_value: bool,
}

impl CorrectionWorkflow {
    pub fn new(keys: KeySpace, registry: BatchRegistry, verify_incorrect_value: bool) -> Self {
        Self {
            keys,
            registry,
            verify_incorrect_value,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(
            KeySpace::new(config.correction_key_prefix.clone()),
            BatchRegistry::from_config(config)?,
            config.workflow.verify_incorrect_value,
        ))
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    fn load_index<W: WorldState + ?Sized>(&self, state: &mut W, batch_id: &str) -> Result<Option<CorrectionIndex>> {
        state.get_json(&self.keys.correction_index_key(batch_id))
    }

    /// Load a request the index points at; a dangling index is corrupt data
    fn load_request<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
        sequence: u64,
    ) -> Result<CorrectionRequest> {
        let key = self.keys.correction_request_key(batch_id, sequence);
        state.get_json(&key)?.ok_or_else(|| {
            LedgerError::SerializationFailure(format!(
                "correction index for batch {} references missing request {}",
                batch_id, key
            ))
        })
    }

    /// Record an approved correction request for a batch
    pub fn request_correction<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
        incorrect_value: &str,
        proposed_value: &str,
        approved_by: &str,
        approval_evidence: &str,
    ) -> Result<CorrectionRequest> {
        let batch = self.registry.get_batch(state, batch_id)?;

        if approved_by.trim().is_empty() {
            return Err(LedgerError::InvalidArgument("approvedBy is required".to_string()));
        }
        if approval_evidence.trim().is_empty() {
            return Err(LedgerError::InvalidArgument("approvalEvidence is required".to_string()));
        }
        if proposed_value.trim().is_empty() {
            return Err(LedgerError::InvalidArgument("proposedValue is required".to_string()));
        }
        if self.verify_incorrect_value && incorrect_value != batch.product_code {
            return Err(LedgerError::InvalidArgument(format!(
                "incorrectValue '{}' does not match current product code '{}' of batch {}",
                incorrect_value, batch.product_code, batch_id
            )));
        }

        let mut index = self
            .load_index(state, batch_id)?
            .unwrap_or_else(|| CorrectionIndex::new(batch_id.to_string()));

        if let Some(previous) = index.pending_sequence {
            log::warn!(
                "Correction request {} for batch {} superseded before it was applied",
                previous, batch_id
            );
        }

        let sequence = index.request_count + 1;
        let key = self.keys.correction_request_key(batch_id, sequence);
        if state.get(&key)?.is_some() {
            return Err(LedgerError::SerializationFailure(format!(
                "correction index for batch {} is behind stored request {}",
                batch_id, key
            )));
        }

        let request = CorrectionRequest {
            batch_id: batch_id.to_string(),
            sequence,
            incorrect_value: incorrect_value.to_string(),
            proposed_value: proposed_value.to_string(),
            approved_by: approved_by.to_string(),
            approval_evidence: approval_evidence.to_string(),
            requested_by: state.caller().id.clone(),
            tx_id: state.tx_id().to_string(),
            requested_at: state.timestamp(),
            consumed: false,
            consumed_tx_id: None,
            consumed_at: None,
            superseded: false,
        };
        state.put_json(&key, &request)?;

        index.request_count = sequence;
        index.pending_sequence = Some(sequence);
        state.put_json(&self.keys.correction_index_key(batch_id), &index)?;

        log::info!(
            "Recorded correction request {} for batch {} ({} -> {}, approved by {})",
            sequence, batch_id, incorrect_value, proposed_value, approved_by
        );
        Ok(request)
    }

    /// Apply the pending correction request of a batch
    pub fn correct_error<W: WorldState + ?Sized>(&self, state: &mut W, batch_id: &str) -> Result<BatchRecord> {
        // The index key of a reserved id may land on another batch's request
        if self.keys.is_reserved(batch_id) {
            return Err(LedgerError::NotFound(format!("batch {} does not exist", batch_id)));
        }

        let mut index = self.load_index(state, batch_id)?.ok_or_else(|| {
            LedgerError::NotFound(format!("correction request for batch {} does not exist", batch_id))
        })?;

        let sequence = index.pending_sequence.ok_or_else(|| {
            LedgerError::AlreadyApplied(format!(
                "correction request {} for batch {} has already been applied",
                index.request_count, batch_id
            ))
        })?;

        let mut request = self.load_request(state, batch_id, sequence)?;
        if request.batch_id != batch_id {
            return Err(LedgerError::SerializationFailure(format!(
                "correction request {} stored for batch {} references batch {}",
                sequence, batch_id, request.batch_id
            )));
        }
        if request.consumed {
            return Err(LedgerError::AlreadyApplied(format!(
                "correction request {} for batch {} has already been applied",
                sequence, batch_id
            )));
        }

        let batch = self.registry.apply_correction(state, batch_id, &request.proposed_value)?;

        request.consumed = true;
        request.consumed_tx_id = Some(state.tx_id().to_string());
        request.consumed_at = Some(state.timestamp());
        state.put_json(&self.keys.correction_request_key(batch_id, sequence), &request)?;

        index.pending_sequence = None;
        state.put_json(&self.keys.correction_index_key(batch_id), &index)?;

        log::info!("Applied correction request {} to batch {}", sequence, batch_id);
        Ok(batch)
    }

    /// Every request recorded for a batch, in sequence order
    ///
    /// Requests that were neither applied nor still pending come back marked
    /// `superseded`.
    pub fn list_corrections<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
    ) -> Result<Vec<CorrectionRequest>> {
        if self.keys.is_reserved(batch_id) {
            return Ok(Vec::new());
        }

        let pending_sequence = self.load_index(state, batch_id)?.and_then(|index| index.pending_sequence);

        state
            .scan_prefix(&self.keys.correction_request_scan_prefix(batch_id))?
            .into_iter()
            .map(|(key, bytes)| {
                let mut request: CorrectionRequest = decode_json(&key, &bytes)?;
                request.superseded = !request.consumed && pending_sequence != Some(request.sequence);
                Ok(request)
            })
            .collect()
    }

    /// Where a batch currently sits in the correction state machine
    pub fn correction_status<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        batch_id: &str,
    ) -> Result<CorrectionStatus> {
        let batch = self.registry.get_batch(state, batch_id)?;
        let index = self.load_index(state, batch_id)?;

        let pending_sequence = index.as_ref().and_then(|i| i.pending_sequence);
        let request_count = index.as_ref().map(|i| i.request_count).unwrap_or(0);

        let correction_state = if pending_sequence.is_some() {
            CorrectionState::RequestPending
        } else if batch.flagged_erroneous {
            CorrectionState::Flagged
        } else {
            CorrectionState::Clean
        };

        Ok(CorrectionStatus {
            batch_id: batch_id.to_string(),
            state: correction_state,
            pending_sequence,
            request_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use correction_types::CallerIdentity;
    use crate::state::{test_transaction, MemoryStore, StateStore, Transaction};

    fn workflow() -> CorrectionWorkflow {
        CorrectionWorkflow::from_config(&LedgerConfig::default()).unwrap()
    }

    fn commissioner() -> CallerIdentity {
        CallerIdentity::new("commissioner-42", &["commissioner"])
    }

    /// Batch "1" created as x2y and flagged, committed
    fn flagged_batch(store: &MemoryStore, workflow: &CorrectionWorkflow) {
        let mut tx = test_transaction(store, "setup", CallerIdentity::new("plant-7", &["manufacturer"]));
        workflow.registry().create_batch(&mut tx, "1", "x2y", 1000).unwrap();
        workflow.registry().flag_error(&mut tx, "1", "wrong brand selected").unwrap();
        tx.commit().unwrap();
    }

    fn request(workflow: &CorrectionWorkflow, tx: &mut Transaction<'_, MemoryStore>, proposed: &str) -> Result<CorrectionRequest> {
        workflow.request_correction(tx, "1", "x2y", proposed, "commissioner-42", "letter-2024-07-01")
    }

    #[test]
    fn test_request_for_missing_batch() {
        let store = MemoryStore::new();
        let mut tx = test_transaction(&store, "tx1", commissioner());

        let err = workflow()
            .request_correction(&mut tx, "404", "x2y", "xyz", "commissioner-42", "letter")
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_request_without_approver_writes_nothing() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());

        let err = workflow
            .request_correction(&mut tx, "1", "x2y", "xyz", "", "letter-2024-07-01")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        let err = workflow
            .request_correction(&mut tx, "1", "x2y", "xyz", "commissioner-42", "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert_eq!(tx.pending_writes(), 0);
    }

    #[test]
    fn test_request_records_provenance() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx-request", commissioner());

        let recorded = request(&workflow, &mut tx, "xyz").unwrap();

        assert_eq!(recorded.sequence, 1);
        assert_eq!(recorded.requested_by, "commissioner-42");
        assert_eq!(recorded.tx_id, "tx-request");
        assert!(!recorded.consumed);

        let status = workflow.correction_status(&mut tx, "1").unwrap();
        assert_eq!(status.state, CorrectionState::RequestPending);
        assert_eq!(status.pending_sequence, Some(1));
    }

    #[test]
    fn test_correct_error_applies_and_consumes() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);

        let mut tx = test_transaction(&store, "tx1", commissioner());
        request(&workflow, &mut tx, "xyz").unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", commissioner());
        let batch = workflow.correct_error(&mut tx, "1").unwrap();
        assert_eq!(batch, BatchRecord::new("1".to_string(), "xyz".to_string(), 1000));

        let requests = workflow.list_corrections(&mut tx, "1").unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].consumed);
        assert_eq!(requests[0].consumed_tx_id.as_deref(), Some("tx2"));
        assert_eq!(requests[0].proposed_value, "xyz");
        assert_eq!(requests[0].incorrect_value, "x2y");

        let status = workflow.correction_status(&mut tx, "1").unwrap();
        assert_eq!(status.state, CorrectionState::Clean);
        assert_eq!(status.request_count, 1);
    }

    #[test]
    fn test_second_application_is_rejected() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);

        let mut tx = test_transaction(&store, "tx1", commissioner());
        request(&workflow, &mut tx, "xyz").unwrap();
        workflow.correct_error(&mut tx, "1").unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", commissioner());
        let err = workflow.correct_error(&mut tx, "1").unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyApplied(_)));
        assert_eq!(tx.pending_writes(), 0);
    }

    #[test]
    fn test_overlapping_applications_commit_once() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);

        let mut tx = test_transaction(&store, "tx-request", commissioner());
        request(&workflow, &mut tx, "xyz").unwrap();
        tx.commit().unwrap();

        // Both see the same pending request before either commits
        let mut first = test_transaction(&store, "tx-a", commissioner());
        let mut second = test_transaction(&store, "tx-b", commissioner());
        workflow.correct_error(&mut first, "1").unwrap();
        workflow.correct_error(&mut second, "1").unwrap();

        assert!(first.commit().is_ok());
        assert!(matches!(second.commit(), Err(LedgerError::MvccConflict { .. })));

        let mut tx = test_transaction(&store, "tx-check", commissioner());
        let requests = workflow.list_corrections(&mut tx, "1").unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].consumed);
        assert_eq!(requests[0].consumed_tx_id.as_deref(), Some("tx-a"));

        let corrections: Vec<_> = store
            .history("1")
            .unwrap()
            .into_iter()
            .filter(|modification| modification.tx_id == "tx-a" || modification.tx_id == "tx-b")
            .collect();
        assert_eq!(corrections.len(), 1);
        assert_eq!(store.history("CORRECTION_1~0000000001").unwrap().len(), 2);

        let err = workflow.correct_error(&mut tx, "1").unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyApplied(_)));
    }

    #[test]
    fn test_reserved_ids_are_not_found() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());
        request(&workflow, &mut tx, "xyz").unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", commissioner());
        for reserved in ["CORRECTION_1", "1~0000000001"] {
            assert!(matches!(workflow.correct_error(&mut tx, reserved), Err(LedgerError::NotFound(_))));
            assert!(matches!(workflow.correction_status(&mut tx, reserved), Err(LedgerError::NotFound(_))));
            assert!(matches!(
                workflow.request_correction(&mut tx, reserved, "x2y", "xyz", "commissioner-42", "letter"),
                Err(LedgerError::NotFound(_))
            ));
            assert!(workflow.list_corrections(&mut tx, reserved).unwrap().is_empty());
        }
        assert_eq!(tx.pending_writes(), 0);
    }

    #[test]
    fn test_correct_error_without_request() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());

        let err = workflow.correct_error(&mut tx, "1").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let batch = workflow.registry().get_batch(&mut tx, "1").unwrap();
        assert_eq!(batch.product_code, "x2y");
        assert!(batch.flagged_erroneous);
    }

    #[test]
    fn test_newer_request_supersedes_without_erasing() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);

        let mut tx = test_transaction(&store, "tx1", commissioner());
        request(&workflow, &mut tx, "xzz").unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", commissioner());
        request(&workflow, &mut tx, "xyz").unwrap();
        let batch = workflow.correct_error(&mut tx, "1").unwrap();
        assert_eq!(batch.product_code, "xyz");

        let requests = workflow.list_corrections(&mut tx, "1").unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].proposed_value, "xzz");
        assert!(!requests[0].consumed);
        assert!(requests[0].superseded);
        assert_eq!(requests[1].proposed_value, "xyz");
        assert!(requests[1].consumed);
        assert!(!requests[1].superseded);
    }

    #[test]
    fn test_pending_request_is_not_superseded() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());
        request(&workflow, &mut tx, "xzz").unwrap();
        request(&workflow, &mut tx, "xyz").unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", commissioner());
        let requests = workflow.list_corrections(&mut tx, "1").unwrap();
        assert!(requests[0].superseded);
        assert!(!requests[1].superseded);

        // The marker is derived, never written back
        let stored = store.read("CORRECTION_1~0000000001").unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_slice(&stored.value).unwrap();
        assert!(stored.get("superseded").is_none());
    }

    #[test]
    fn test_incorrect_value_check_when_enabled() {
        let mut config = LedgerConfig::default();
        config.workflow.verify_incorrect_value = true;
        let workflow = CorrectionWorkflow::from_config(&config).unwrap();
        let store = MemoryStore::new();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());

        let err = workflow
            .request_correction(&mut tx, "1", "abc", "xyz", "commissioner-42", "letter")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        assert!(request(&workflow, &mut tx, "xyz").is_ok());
    }

    #[test]
    fn test_status_of_flagged_batch() {
        let store = MemoryStore::new();
        let workflow = workflow();
        flagged_batch(&store, &workflow);
        let mut tx = test_transaction(&store, "tx1", commissioner());

        let status = workflow.correction_status(&mut tx, "1").unwrap();
        assert_eq!(status.state, CorrectionState::Flagged);
        assert_eq!(status.pending_sequence, None);
        assert_eq!(status.request_count, 0);
    }
}
