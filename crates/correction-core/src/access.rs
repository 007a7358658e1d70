//! Access-control layer in front of the contract
//!
//! Runs before any contract function executes. The workflow itself never
//! inspects roles; it only sees calls this gate has admitted.

use correction_types::CallerIdentity;
use crate::config::{AccessConfig, LedgerConfig};
use crate::contract::Function;
use crate::error::{LedgerError, Result};

/// Position of `approvedBy` in RequestCorrection's argument list
const APPROVED_BY_ARG: usize = 3;

pub struct AccessGate {
    access: AccessConfig,
}

impl AccessGate {
    pub fn new(access: AccessConfig) -> Self {
        Self { access }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.access.clone())
    }

    /// Admit or reject `caller` for `function` with the given raw arguments
    pub fn authorize(&self, function: Function, caller: &CallerIdentity, args: &[String]) -> Result<()> {
        if caller.id.trim().is_empty() {
            return Err(LedgerError::Unauthorized("caller identity is missing".to_string()));
        }

        let roles = self.access.roles_for(function).unwrap_or(&[]);
        if !roles.is_empty() && !caller.has_any_role(roles) {
            return Err(LedgerError::Unauthorized(format!(
                "{} requires one of the roles [{}], caller {} has [{}]",
                function,
                roles.join(", "),
                caller.id,
                caller.roles.join(", ")
            )));
        }

        // Approval must come from the verified caller, not a free-text name
        // Blank approvers are left to the workflow's InvalidArgument
        if function == Function::RequestCorrection && self.access.bind_approver_to_caller {
            if let Some(approved_by) = args.get(APPROVED_BY_ARG) {
                if !approved_by.trim().is_empty() && approved_by != &caller.id {
                    return Err(LedgerError::Unauthorized(format!(
                        "approvedBy '{}' does not match caller {}",
                        approved_by, caller.id
                    )));
                }
            }
        }

        Ok(())
    }
}
