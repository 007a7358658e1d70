//! Contract entry points: argument decoding, access gate, dispatch

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use correction_types::BatchRecord;
use crate::access::AccessGate;
use crate::config::{LedgerConfig, SeedBatch};
use crate::correction::CorrectionWorkflow;
use crate::error::{LedgerError, Result};
use crate::state::WorldState;

/// Named entry points exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    InitLedger,
    CreateBatch,
    #[serde(alias = "RecordError")]
    FlagError,
    RequestCorrection,
    CorrectError,
    GetBatch,
    GetBatchHistory,
    ListCorrections,
    GetCorrectionStatus,
}

impl Function {
    pub const ALL: [Function; 9] = [
        Function::InitLedger,
        Function::CreateBatch,
        Function::FlagError,
        Function::RequestCorrection,
        Function::CorrectError,
        Function::GetBatch,
        Function::GetBatchHistory,
        Function::ListCorrections,
        Function::GetCorrectionStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitLedger => "InitLedger",
            Self::CreateBatch => "CreateBatch",
            Self::FlagError => "FlagError",
            Self::RequestCorrection => "RequestCorrection",
            Self::CorrectError => "CorrectError",
            Self::GetBatch => "GetBatch",
            Self::GetBatchHistory => "GetBatchHistory",
            Self::ListCorrections => "ListCorrections",
            Self::GetCorrectionStatus => "GetCorrectionStatus",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Function {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "RecordError" {
            return Ok(Self::FlagError);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|function| function.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown function '{}'", s)))
    }
}

/// Exactly `N` positional arguments
fn expect_args<const N: usize>(function: Function, args: &[String]) -> Result<[&str; N]> {
    if args.len() != N {
        return Err(LedgerError::InvalidArgument(format!(
            "{} expects {} arguments, got {}",
            function,
            N,
            args.len()
        )));
    }

    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}

fn parse_quantity(raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        LedgerError::InvalidArgument(format!("quantity '{}' is not a non-negative integer", raw))
    })
}

fn to_payload<T: Serialize>(value: &T) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| LedgerError::SerializationFailure(format!("Failed to serialize response: {}", e)))
}

/// The error-correction contract as seen by the host ledger
///
/// Writes answer with no payload; reads answer with the JSON of the requested
/// record(s).
pub struct ErrorCorrectionContract {
    workflow: CorrectionWorkflow,
    gate: AccessGate,
    seed_batches: Vec<SeedBatch>,
}

impl ErrorCorrectionContract {
    pub fn new(workflow: CorrectionWorkflow, gate: AccessGate, seed_batches: Vec<SeedBatch>) -> Self {
        Self {
            workflow,
            gate,
            seed_batches,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Ok(Self::new(
            CorrectionWorkflow::from_config(config)?,
            AccessGate::from_config(config),
            config.seed_batches.clone(),
        ))
    }

    /// Decode, authorize and run one contract call inside the caller's transaction
    pub fn invoke<W: WorldState + ?Sized>(
        &self,
        state: &mut W,
        function_name: &str,
        args: &[String],
    ) -> Result<Option<serde_json::Value>> {
        let function: Function = function_name.parse()?;
        self.gate.authorize(function, state.caller(), args)?;

        let registry = self.workflow.registry();

        match function {
            Function::InitLedger => {
                expect_args::<0>(function, args)?;
                self.init_ledger(state)?;
                Ok(None)
            }
            Function::CreateBatch => {
                let [batch_id, product_code, quantity] = expect_args::<3>(function, args)?;
                let quantity = parse_quantity(quantity)?;
                registry.create_batch(state, batch_id, product_code, quantity)?;
                Ok(None)
            }
            Function::FlagError => {
                let [batch_id, error_details] = expect_args::<2>(function, args)?;
                registry.flag_error(state, batch_id, error_details)?;
                Ok(None)
            }
            Function::RequestCorrection => {
                let [batch_id, incorrect_value, proposed_value, approved_by, approval_evidence] =
                    expect_args::<5>(function, args)?;
                self.workflow.request_correction(
                    state,
                    batch_id,
                    incorrect_value,
                    proposed_value,
                    approved_by,
                    approval_evidence,
                )?;
                Ok(None)
            }
            Function::CorrectError => {
                let [batch_id] = expect_args::<1>(function, args)?;
                self.workflow.correct_error(state, batch_id)?;
                Ok(None)
            }
            Function::GetBatch => {
                let [batch_id] = expect_args::<1>(function, args)?;
                to_payload(&registry.get_batch(state, batch_id)?)
            }
            Function::GetBatchHistory => {
                let [batch_id] = expect_args::<1>(function, args)?;
                to_payload(&registry.get_batch_history(state, batch_id)?)
            }
            Function::ListCorrections => {
                let [batch_id] = expect_args::<1>(function, args)?;
                to_payload(&self.workflow.list_corrections(state, batch_id)?)
            }
            Function::GetCorrectionStatus => {
                let [batch_id] = expect_args::<1>(function, args)?;
                to_payload(&self.workflow.correction_status(state, batch_id)?)
            }
        }
    }

    /// Seed the configured batches, leaving existing ones untouched
    fn init_ledger<W: WorldState + ?Sized>(&self, state: &mut W) -> Result<Vec<BatchRecord>> {
        let registry = self.workflow.registry();
        let mut created = Vec::new();

        for seed in &self.seed_batches {
            if registry.batch_exists(state, &seed.batch_id)? {
                log::info!("Seed batch {} already present, skipping", seed.batch_id);
                continue;
            }
            created.push(registry.create_batch(state, &seed.batch_id, &seed.product_code, seed.quantity)?);
        }

        log::info!("Initialized ledger with {} seed batches", created.len());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use correction_types::CallerIdentity;
    use crate::state::{test_transaction, MemoryStore};

    fn contract() -> ErrorCorrectionContract {
        ErrorCorrectionContract::from_config(&LedgerConfig::default()).unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_function_names() {
        assert_eq!("CorrectError".parse::<Function>().unwrap(), Function::CorrectError);
        assert_eq!("RecordError".parse::<Function>().unwrap(), Function::FlagError);
        assert!(matches!("DeleteBatch".parse::<Function>(), Err(LedgerError::InvalidArgument(_))));

        let parsed: Function = serde_json::from_str("\"RecordError\"").unwrap();
        assert_eq!(parsed, Function::FlagError);
    }

    #[test]
    fn test_wrong_argument_count() {
        let store = MemoryStore::new();
        let mut tx = test_transaction(&store, "tx1", CallerIdentity::new("plant-7", &["manufacturer"]));

        let err = contract().invoke(&mut tx, "CreateBatch", &args(&["1", "x2y"])).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn test_negative_quantity_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = test_transaction(&store, "tx1", CallerIdentity::new("plant-7", &["manufacturer"]));

        let err = contract().invoke(&mut tx, "CreateBatch", &args(&["1", "x2y", "-5"])).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert_eq!(tx.pending_writes(), 0);
    }

    #[test]
    fn test_writes_return_no_payload_and_reads_return_json() {
        let store = MemoryStore::new();
        let contract = contract();
        let mut tx = test_transaction(&store, "tx1", CallerIdentity::new("plant-7", &["manufacturer"]));

        let payload = contract.invoke(&mut tx, "CreateBatch", &args(&["7", "x2y", "12"])).unwrap();
        assert!(payload.is_none());

        let payload = contract.invoke(&mut tx, "GetBatch", &args(&["7"])).unwrap().unwrap();
        assert_eq!(payload["productCode"], "x2y");
        assert_eq!(payload["quantity"], 12);
    }

    #[test]
    fn test_init_ledger_is_idempotent() {
        let store = MemoryStore::new();
        let contract = contract();
        let admin = CallerIdentity::new("admin-1", &["admin"]);

        let mut tx = test_transaction(&store, "tx1", admin.clone());
        contract.invoke(&mut tx, "InitLedger", &[]).unwrap();
        tx.commit().unwrap();

        let mut tx = test_transaction(&store, "tx2", admin);
        contract.invoke(&mut tx, "InitLedger", &[]).unwrap();
        assert_eq!(tx.pending_writes(), 0);

        let payload = contract.invoke(&mut tx, "GetBatch", &args(&["1"])).unwrap().unwrap();
        assert_eq!(payload["productCode"], "xyz");
        assert_eq!(payload["quantity"], 1000);
    }

    #[test]
    fn test_gate_runs_before_the_workflow() {
        let store = MemoryStore::new();
        let mut tx = test_transaction(&store, "tx1", CallerIdentity::new("auditor-1", &[]));

        let err = contract().invoke(&mut tx, "CreateBatch", &args(&["1", "x2y", "1000"])).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
        assert_eq!(tx.pending_writes(), 0);
    }
}
