//! Proposal inbox: JSON proposals dropped into a directory are executed one by one
//!
//! Layout under the inbox root:
//! - `*.json` pending proposals
//! - `receipts/` one receipt per executed proposal
//! - `processed/` proposals whose transaction committed
//! - `failed/` proposals that aborted or could not be parsed
//!
//! Writers should create the proposal elsewhere and rename it into the inbox,
//! otherwise a half-written file may be picked up and land in `failed/`.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use correction_core::{Ledger, StateStore};
use correction_types::{Proposal, TxReceipt};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// What happened to one inbox file
#[derive(Debug)]
pub enum Outcome {
    Committed(TxReceipt),
    Aborted(TxReceipt),
    Rejected(String),
}

pub struct Inbox {
    root: PathBuf,
    receipts: PathBuf,
    processed: PathBuf,
    failed: PathBuf,
}

impl Inbox {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let inbox = Self {
            receipts: root.join("receipts"),
            processed: root.join("processed"),
            failed: root.join("failed"),
            root,
        };

        for dir in [&inbox.root, &inbox.receipts, &inbox.processed, &inbox.failed] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(inbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Proposal files waiting in the inbox, in name order
    pub fn pending(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if is_proposal_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Execute one proposal file and file it away with its receipt
    ///
    /// Proposals without a `tx_id` take the file stem, so a file seen twice is
    /// rejected as a duplicate instead of running again. Host storage failures
    /// leave the file where it is and are returned as errors.
    pub fn process_file<S: StateStore>(&self, ledger: &Ledger<S>, path: &Path) -> Result<Outcome> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?
            .to_string();

        log::info!("Processing proposal file: {}", file_name);

        let mut proposal = match read_proposal(path) {
            Ok(proposal) => proposal,
            Err(e) => {
                log::error!("Rejected proposal file {}: {:#}", file_name, e);
                fs::rename(path, self.failed.join(&file_name))?;
                return Ok(Outcome::Rejected(format!("{:#}", e)));
            }
        };

        if proposal.tx_id.is_none() {
            proposal.tx_id = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
        }

        let receipt = ledger.submit(proposal)?;

        let receipt_path = self.receipts.join(format!("{}.receipt.json", receipt.tx_id));
        fs::write(&receipt_path, serde_json::to_string_pretty(&receipt)?)?;

        let destination_dir = if receipt.is_committed() {
            &self.processed
        } else {
            &self.failed
        };
        fs::rename(path, destination_dir.join(&file_name))?;

        log::debug!(
            "Moved proposal file to {}: {}",
            if receipt.is_committed() { "processed" } else { "failed" },
            file_name
        );

        Ok(if receipt.is_committed() {
            Outcome::Committed(receipt)
        } else {
            Outcome::Aborted(receipt)
        })
    }

    /// Work off whatever is already waiting
    pub fn drain<S: StateStore>(&self, ledger: &Ledger<S>) -> Result<usize> {
        let pending = self.pending()?;
        for path in &pending {
            self.process_file(ledger, path)?;
        }
        Ok(pending.len())
    }
}

fn is_proposal_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Parse a proposal JSON file
pub fn read_proposal(path: &Path) -> Result<Proposal> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse proposal JSON")
}

/// Drain the inbox, then keep executing proposals as they arrive
pub async fn monitor<S: StateStore>(ledger: Ledger<S>, inbox: Inbox) -> Result<()> {
    log::info!("Monitoring proposals in {}/", inbox.root().display());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) => {
                if tx.send(event).is_err() {
                    log::warn!("Inbox monitor stopped, dropping file system event");
                }
            }
            Err(e) => log::error!("Watcher error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(inbox.root(), RecursiveMode::NonRecursive)?;

    let drained = inbox.drain(&ledger)?;
    log::info!("Processed {} waiting proposals, watching for new ones", drained);

    while let Some(event) = rx.recv().await {
        log::debug!("File system event: {:?}", event);

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in event.paths {
            // Moved away already by an earlier event for the same file
            if !is_proposal_file(&path) {
                continue;
            }
            if let Err(e) = inbox.process_file(&ledger, &path) {
                log::error!("Failed to process proposal file {:?}: {:#}", path, e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use correction_core::{LedgerConfig, MemoryStore};
    use correction_types::ErrorKind;
    use tempfile::TempDir;

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::from_config(MemoryStore::new(), &LedgerConfig::default()).unwrap()
    }

    fn drop_proposal(inbox: &Inbox, name: &str, json: &str) -> PathBuf {
        let path = inbox.root().join(name);
        fs::write(&path, json).unwrap();
        path
    }

    const CREATE: &str = r#"{
        "caller": { "id": "plant-7", "roles": ["manufacturer"] },
        "function": "CreateBatch",
        "args": ["1", "x2y", "1000"]
    }"#;

    #[test]
    fn test_committed_proposal_is_processed() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path().join("inbox")).unwrap();
        let ledger = ledger();

        let path = drop_proposal(&inbox, "create-1.json", CREATE);
        let outcome = inbox.process_file(&ledger, &path).unwrap();

        match outcome {
            Outcome::Committed(receipt) => assert_eq!(receipt.tx_id, "create-1"),
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(!path.exists());
        assert!(inbox.processed.join("create-1.json").exists());

        let receipt = fs::read_to_string(inbox.receipts.join("create-1.receipt.json")).unwrap();
        let receipt: TxReceipt = serde_json::from_str(&receipt).unwrap();
        assert!(receipt.is_committed());
    }

    #[test]
    fn test_aborted_proposal_is_failed_with_receipt() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path()).unwrap();
        let ledger = ledger();

        let path = drop_proposal(
            &inbox,
            "flag-404.json",
            r#"{
                "tx_id": "tx-flag-404",
                "caller": { "id": "plant-7", "roles": ["manufacturer"] },
                "function": "FlagError",
                "args": ["404", "wrong brand selected"]
            }"#,
        );
        let outcome = inbox.process_file(&ledger, &path).unwrap();

        match outcome {
            Outcome::Aborted(receipt) => assert_eq!(receipt.error_kind(), Some(ErrorKind::NotFound)),
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(inbox.failed.join("flag-404.json").exists());
        assert!(inbox.receipts.join("tx-flag-404.receipt.json").exists());
    }

    #[test]
    fn test_malformed_proposal_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path()).unwrap();
        let ledger = ledger();

        let path = drop_proposal(&inbox, "broken.json", "{ \"function\": ");
        let outcome = inbox.process_file(&ledger, &path).unwrap();

        assert!(matches!(outcome, Outcome::Rejected(_)));
        assert!(inbox.failed.join("broken.json").exists());
        assert_eq!(fs::read_dir(&inbox.receipts).unwrap().count(), 0);
        assert!(ledger.transactions().unwrap().is_empty());
    }

    #[test]
    fn test_resubmitted_file_is_a_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path()).unwrap();
        let ledger = ledger();

        let path = drop_proposal(&inbox, "create-1.json", CREATE);
        inbox.process_file(&ledger, &path).unwrap();

        let path = drop_proposal(&inbox, "create-1.json", CREATE);
        match inbox.process_file(&ledger, &path).unwrap() {
            Outcome::Aborted(receipt) => assert_eq!(receipt.error_kind(), Some(ErrorKind::AlreadyExists)),
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_drain_runs_pending_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path()).unwrap();
        let ledger = ledger();

        drop_proposal(
            &inbox,
            "02-flag.json",
            r#"{
                "caller": { "id": "plant-7", "roles": ["manufacturer"] },
                "function": "FlagError",
                "args": ["1", "wrong brand selected"]
            }"#,
        );
        drop_proposal(&inbox, "01-create.json", CREATE);
        fs::write(inbox.root().join("notes.txt"), "ignored").unwrap();

        assert_eq!(inbox.drain(&ledger).unwrap(), 2);

        let log = ledger.transactions().unwrap();
        assert_eq!(log[0].tx_id, "01-create");
        assert_eq!(log[1].tx_id, "02-flag");
        assert!(inbox.root().join("notes.txt").exists());
        assert!(inbox.pending().unwrap().is_empty());
    }
}
