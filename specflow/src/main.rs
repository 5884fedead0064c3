//! Operator CLI for a specflow home directory.
//!
//! Inspects and repairs `var/`: runs recovery, lists transaction
//! directories, and prints the state, journal and metrics files as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use specflow::core::types::{ApplicationState, JournalEntry};
use specflow::engine::Engine;
use specflow::exit_codes;
use specflow::io::config::{EngineConfig, load_config, write_config};
use specflow::io::journal::{last_entry, read_journal};
use specflow::io::layout::HomeLayout;
use specflow::io::metrics::load_metrics;
use specflow::io::scan::Scanner;
use specflow::io::state_store::load_state;
use specflow::logging;

#[derive(Parser)]
#[command(
    name = "specflow",
    version,
    about = "Crash-safe state and journal store for agent spec workflows"
)]
struct Cli {
    /// Engine home directory (holds `config.toml` and `var/`).
    #[arg(long, global = true, default_value = ".")]
    home: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `var/` and a default `config.toml` if missing.
    Init {
        /// Overwrite an existing `config.toml` with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Finish interrupted transactions and print the recovery summary.
    Recover,
    /// List transaction directories and how each one classifies.
    Scan,
    /// Print `var/state.json` (defaults if it does not exist yet).
    State,
    /// Print journal entries, one JSON object per line.
    Journal {
        /// Only print the last N entries.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Print `var/metrics.json`.
    Metrics,
    /// Print the state, whether its WIP lease has lapsed, and the last journal entry.
    Status,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let layout = HomeLayout::new(&cli.home);
    let config = load_config(&layout.config_path)?;
    logging::init(&config.logging.default_filter);

    match cli.command {
        Command::Init { force } => cmd_init(&layout, force),
        Command::Recover => cmd_recover(&cli.home),
        Command::Scan => cmd_scan(&layout),
        Command::State => cmd_state(&layout),
        Command::Journal { tail } => cmd_journal(&layout, tail),
        Command::Metrics => cmd_metrics(&layout),
        Command::Status => cmd_status(&layout),
    }
}

fn cmd_init(layout: &HomeLayout, force: bool) -> Result<i32> {
    init_home(layout, force)?;
    Ok(exit_codes::OK)
}

fn cmd_recover(home: &Path) -> Result<i32> {
    let engine = Engine::open(home, CancellationToken::new())?;
    let recovery = engine.recovery();
    print_json(recovery)?;
    if recovery.is_clean() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::RECOVERY_INCOMPLETE)
    }
}

fn cmd_scan(layout: &HomeLayout) -> Result<i32> {
    let inventory = Scanner::new(&layout.txn_dir)
        .scan()
        .with_context(|| format!("scan {}", layout.txn_dir.display()))?;
    print_json(&inventory)?;
    Ok(exit_codes::OK)
}

fn cmd_state(layout: &HomeLayout) -> Result<i32> {
    let state = load_state(&layout.state_path)?;
    print_json(&state)?;
    Ok(exit_codes::OK)
}

fn cmd_journal(layout: &HomeLayout, tail: Option<usize>) -> Result<i32> {
    let replay = read_journal(&layout.journal_path)?;
    let skip = tail.map_or(0, |n| replay.entries.len().saturating_sub(n));
    for entry in &replay.entries[skip..] {
        println!(
            "{}",
            serde_json::to_string(entry).context("serialize journal entry")?
        );
    }
    if replay.torn_tail {
        eprintln!("note: ignored damaged trailing journal content");
    }
    Ok(exit_codes::OK)
}

fn cmd_metrics(layout: &HomeLayout) -> Result<i32> {
    print_json(&load_metrics(&layout.metrics_path))?;
    Ok(exit_codes::OK)
}

fn cmd_status(layout: &HomeLayout) -> Result<i32> {
    print_json(&status_report(layout, Utc::now())?)?;
    Ok(exit_codes::OK)
}

#[derive(Debug, Serialize)]
struct StatusReport {
    state: ApplicationState,
    lease_expired: bool,
    last_entry: Option<JournalEntry>,
}

fn status_report(layout: &HomeLayout, now: DateTime<Utc>) -> Result<StatusReport> {
    let state = load_state(&layout.state_path)?;
    let last_entry = last_entry(&layout.journal_path)?;
    Ok(StatusReport {
        lease_expired: state.lease_expired(now),
        state,
        last_entry,
    })
}

/// Returns whether `config.toml` was written.
fn init_home(layout: &HomeLayout, force: bool) -> Result<bool> {
    layout
        .ensure_dirs()
        .with_context(|| format!("prepare {}", layout.var_dir.display()))?;
    if !force && layout.config_path.exists() {
        return Ok(false);
    }
    write_config(&layout.config_path, &EngineConfig::default())?;
    Ok(true)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
