//! Host side of a submission: one proposal, one transaction, one log entry

use std::collections::HashSet;
use std::sync::Mutex;
use chrono::Utc;
use correction_types::{ErrorKind, Proposal, TxError, TxReceipt, TxRecord, TxStatus};
use crate::config::LedgerConfig;
use crate::contract::ErrorCorrectionContract;
use crate::error::{LedgerError, Result};
use crate::state::{StateStore, Transaction};

/// Runs contract calls as isolated transactions against a store
///
/// A failing call (or a commit-time conflict) aborts the whole transaction:
/// none of its writes reach the store. Committed and aborted attempts alike are
/// appended to the store's transaction log. `submit` may be called from several
/// threads; a tx id is claimed before execution so it runs at most once.
pub struct Ledger<S: StateStore> {
    store: S,
    contract: ErrorCorrectionContract,
    in_flight: Mutex<HashSet<String>>,
}

/// Tx id reserved for one running submission, released on drop
struct TxClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    tx_id: String,
}

impl Drop for TxClaim<'_> {
    fn drop(&mut self) {
        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&self.tx_id);
            }
            Err(_) => log::error!("In-flight tx set poisoned, tx {} stays claimed", self.tx_id),
        }
    }
}

impl<S: StateStore> Ledger<S> {
    pub fn new(store: S, contract: ErrorCorrectionContract) -> Self {
        Self {
            store,
            contract,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(store: S, config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(store, ErrorCorrectionContract::from_config(config)?))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Execute a proposal; only storage failures surface as `Err`
    pub fn submit(&self, proposal: Proposal) -> Result<TxReceipt> {
        let tx_id = proposal
            .tx_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timestamp = Utc::now();

        log::info!(
            "Submitting tx {} {}({}) from {}",
            tx_id,
            proposal.function,
            proposal.args.join(", "),
            proposal.caller.id
        );

        let claim = self.claim(&tx_id)?;
        let outcome = if claim.is_none() {
            Err(LedgerError::AlreadyExists(format!("transaction {} was already submitted", tx_id)))
        } else {
            let mut tx = Transaction::new(&self.store, tx_id.clone(), timestamp, proposal.caller.clone());
            self.contract
                .invoke(&mut tx, &proposal.function, &proposal.args)
                .and_then(|payload| tx.commit().map(|_| payload))
        };

        let (status, payload, error) = match outcome {
            Ok(payload) => {
                log::info!("Committed tx {}", tx_id);
                (TxStatus::Committed, payload, None)
            }
            Err(e) if e.kind() == ErrorKind::Storage => return Err(e),
            Err(e) => {
                log::warn!("Aborted tx {} ({}): {}", tx_id, e.kind(), e);
                let error = TxError {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                (TxStatus::Aborted, None, Some(error))
            }
        };

        self.store.record_transaction(TxRecord {
            tx_id: tx_id.clone(),
            function: proposal.function.clone(),
            caller_id: proposal.caller.id.clone(),
            timestamp,
            status,
            error: error.clone(),
        })?;

        Ok(TxReceipt {
            tx_id,
            function: proposal.function,
            status,
            payload,
            error,
        })
    }

    /// Reserve `tx_id` unless it is running or already in the log
    fn claim(&self, tx_id: &str) -> Result<Option<TxClaim<'_>>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| LedgerError::Storage("in-flight tx set poisoned".to_string()))?;

        if in_flight.contains(tx_id) || self.store.transactions()?.iter().any(|record| record.tx_id == tx_id) {
            return Ok(None);
        }
        in_flight.insert(tx_id.to_string());

        Ok(Some(TxClaim {
            in_flight: &self.in_flight,
            tx_id: tx_id.to_string(),
        }))
    }

    /// Every committed or aborted attempt, oldest first
    pub fn transactions(&self) -> Result<Vec<TxRecord>> {
        self.store.transactions()
    }
}
