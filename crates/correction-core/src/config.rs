//! Configuration management for the batch correction ledger

use serde::{Deserialize, Serialize};
use crate::contract::Function;
use crate::error::{LedgerError, Result};
use crate::keys::KEY_SEPARATOR;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `LEDGER_WORKFLOW__VERIFY_INCORRECT_VALUE=true`
pub const ENV_PREFIX: &str = "LEDGER";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_correction_key_prefix")]
    pub correction_key_prefix: String,

    #[serde(default = "default_batch_id_pattern")]
    pub batch_id_pattern: String,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub access: AccessConfig,

    #[serde(default = "default_seed_batches")]
    pub seed_batches: Vec<SeedBatch>,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Reject a correction whose `incorrectValue` differs from the batch's current product code
    #[serde(default)]
    pub verify_incorrect_value: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Only admit RequestCorrection when `approvedBy` is the caller's own verified id
    #[serde(default = "default_bind_approver")]
    pub bind_approver_to_caller: bool,

    #[serde(default = "default_access_rules")]
    pub rules: Vec<AccessRule>,
}

impl AccessConfig {
    /// Roles admitted to `function`, or None when no rule names it
    pub fn roles_for(&self, function: Function) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.function == function)
            .map(|rule| rule.roles.as_slice())
    }
}

/// Roles admitted to call a contract function; an empty list leaves it open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub function: Function,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedBatch {
    pub batch_id: String,
    pub product_code: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: PathBuf,
}

// Default functions
fn default_correction_key_prefix() -> String {
    "CORRECTION_".to_string()
}

fn default_batch_id_pattern() -> String {
    r"^[A-Za-z0-9][A-Za-z0-9._:-]*$".to_string()
}

fn default_bind_approver() -> bool {
    true
}

fn rule(function: Function, roles: &[&str]) -> AccessRule {
    AccessRule {
        function,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn default_access_rules() -> Vec<AccessRule> {
    vec![
        rule(Function::InitLedger, &["admin"]),
        rule(Function::CreateBatch, &["manufacturer"]),
        rule(Function::FlagError, &["manufacturer", "inspector"]),
        rule(Function::RequestCorrection, &["commissioner"]),
        rule(Function::CorrectError, &["commissioner"]),
    ]
}

fn default_seed_batches() -> Vec<SeedBatch> {
    vec![SeedBatch {
        batch_id: "1".to_string(),
        product_code: "xyz".to_string(),
        quantity: 1000,
    }]
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/world_state.json")
}

fn default_inbox_dir() -> PathBuf {
    PathBuf::from("data/inbox")
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            bind_approver_to_caller: default_bind_approver(),
            rules: default_access_rules(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            inbox_dir: default_inbox_dir(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            correction_key_prefix: default_correction_key_prefix(),
            batch_id_pattern: default_batch_id_pattern(),
            workflow: WorkflowConfig::default(),
            access: AccessConfig::default(),
            seed_batches: default_seed_batches(),
            storage: StorageConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a file, layered with `LEDGER_` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| LedgerError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Compiled form of `batch_id_pattern`
    pub fn batch_id_regex(&self) -> Result<Regex> {
        Regex::new(&self.batch_id_pattern)
            .map_err(|e| LedgerError::Config(format!("Invalid batch_id_pattern: {}", e)))
    }


    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.correction_key_prefix.is_empty() {
            return Err(LedgerError::Config("correction_key_prefix is required".to_string()));
        }

        if self.correction_key_prefix.contains(KEY_SEPARATOR) {
            return Err(LedgerError::Config(format!(
                "correction_key_prefix must not contain '{}'",
                KEY_SEPARATOR
            )));
        }

        let pattern = self.batch_id_regex()?;

        for seed in &self.seed_batches {
            if !pattern.is_match(&seed.batch_id) {
                return Err(LedgerError::Config(format!(
                    "Seed batch id '{}' does not match batch_id_pattern",
                    seed.batch_id
                )));
            }
            if seed.product_code.is_empty() {
                return Err(LedgerError::Config(format!(
                    "Seed batch '{}' product_code is required",
                    seed.batch_id
                )));
            }
        }

        Ok(())
    }
}
