//! Batch Error-Correction Core Library
//!
//! Batch registry, correction workflow and the versioned world state they run
//! against. A [`Ledger`] executes each contract call as one isolated
//! transaction and keeps the log of every attempt.

pub mod access;
pub mod config;
pub mod contract;
pub mod correction;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod registry;
pub mod state;

pub use config::LedgerConfig;
pub use error::{LedgerError, Result};

pub use access::AccessGate;
pub use contract::{ErrorCorrectionContract, Function};
pub use correction::CorrectionWorkflow;
pub use ledger::Ledger;
pub use registry::BatchRegistry;

pub use state::{FileStore, MemoryStore, StateStore, WorldState};

// Shared record and wire types
pub use correction_types;
