//! Batch correction ledger executable
//!
//! Runs contract calls against the file-backed world state, either one at a
//! time from the command line or continuously from a proposal inbox.

mod inbox;

use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use correction_core::{FileStore, Function, Ledger, LedgerConfig};
use correction_types::{CallerIdentity, Proposal, TxReceipt};
use inbox::Inbox;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let function_names: Vec<&str> = Function::ALL.iter().map(|f| f.as_str()).collect();

    let matches = Command::new("correction-server")
        .version("1.0.0")
        .about("Batch registry and error-correction ledger")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .env("LEDGER_CONFIG")
                .help("Configuration file path (defaults apply when omitted)")
        )
        .arg(
            Arg::new("state-file")
                .long("state-file")
                .value_name("FILE")
                .help("World state file, overrides storage.state_file")
        )
        .arg(
            Arg::new("inbox-dir")
                .long("inbox-dir")
                .value_name("DIR")
                .help("Proposal inbox, overrides storage.inbox_dir")
        )
        .arg(
            Arg::new("invoke")
                .long("invoke")
                .value_name("FUNCTION")
                .help(format!("Run one contract function ({})", function_names.join(", ")))
                .requires("caller")
                .conflicts_with_all(["proposal", "monitor"])
        )
        .arg(
            Arg::new("arg")
                .long("arg")
                .value_name("VALUE")
                .help("Positional argument for --invoke, repeatable")
                .action(ArgAction::Append)
                .allow_hyphen_values(true)
        )
        .arg(
            Arg::new("caller")
                .long("caller")
                .value_name("ID")
                .help("Caller identity for --invoke")
        )
        .arg(
            Arg::new("role")
                .long("role")
                .value_name("ROLE")
                .help("Caller role for --invoke, repeatable")
                .action(ArgAction::Append)
        )
        .arg(
            Arg::new("proposal")
                .long("proposal")
                .value_name("FILE")
                .help("Run the proposal in a JSON file")
                .conflicts_with("monitor")
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .help("Monitor the proposal inbox")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(config_path) => {
            let config = LedgerConfig::from_file(config_path)?;
            log::info!("Loaded configuration from {}", config_path);
            config
        }
        None => {
            log::info!("No configuration file given, using defaults");
            LedgerConfig::default()
        }
    };

    let state_file = matches
        .get_one::<String>("state-file")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.storage.state_file.clone());
    let store = FileStore::open(&state_file)?;
    let ledger = Ledger::from_config(store, &config)?;

    if let Some(function) = matches.get_one::<String>("invoke") {
        let caller_id = matches
            .get_one::<String>("caller")
            .ok_or_else(|| anyhow!("--invoke requires --caller"))?;
        let roles = strings(matches.get_many::<String>("role"));
        let args = strings(matches.get_many::<String>("arg"));

        let proposal = Proposal::new(CallerIdentity::new(caller_id.as_str(), &roles), function, &args);
        let receipt = ledger.submit(proposal)?;
        exit_with(&receipt)?;
    } else if let Some(proposal_path) = matches.get_one::<String>("proposal") {
        let proposal = inbox::read_proposal(Path::new(proposal_path))?;
        let receipt = ledger.submit(proposal)?;
        exit_with(&receipt)?;
    } else if matches.get_flag("monitor") {
        let inbox_dir = matches
            .get_one::<String>("inbox-dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.storage.inbox_dir.clone());

        log::info!("Starting proposal monitor mode");
        let inbox = Inbox::new(&inbox_dir)?;
        inbox::monitor(ledger, inbox).await?;
    } else {
        log::error!("No action specified. Use --help for options.");
        std::process::exit(1);
    }

    Ok(())
}

fn strings<'a>(values: Option<clap::parser::ValuesRef<'a, String>>) -> Vec<&'a str> {
    values.map(|v| v.map(String::as_str).collect()).unwrap_or_default()
}

/// Print the receipt and exit non-zero if the transaction aborted
fn exit_with(receipt: &TxReceipt) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(receipt)?);

    if !receipt.is_committed() {
        std::process::exit(2);
    }
    Ok(())
}
