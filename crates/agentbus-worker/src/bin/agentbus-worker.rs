// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Worker process entrypoint: hold one agent's exclusive lock, then loop
//! over its backlog until told to stop (spec §4.1, §4.7).

use agentbus_bus::BusStorage;
use agentbus_config::{BusSettings, CliOverrides};
use agentbus_receipt::ReceiptStore;
use agentbus_worker::engine::CommandEngineLauncher;
use agentbus_worker::{run_pending, WorkerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agentbus-worker", version, about = "Runs one agent's task backlog to closure")]
struct Cli {
    /// Agent name this process works on behalf of.
    #[arg(long)]
    agent: String,

    /// Bus filesystem root (overrides config/env).
    #[arg(long)]
    bus_root: Option<String>,

    /// Roster JSON path (overrides config/env).
    #[arg(long)]
    roster: Option<String>,

    /// Optional TOML config file, layered beneath CLI/env overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Git working tree the engine runs in. Defaults to the current directory.
    #[arg(long)]
    repo_path: Option<PathBuf>,

    /// Engine executable to invoke for each attempt.
    #[arg(long, default_value = "codex")]
    engine_program: String,

    /// Arguments passed to the engine executable, in order.
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Exit after one backlog pass instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Seconds to sleep between backlog passes when not exiting on idle.
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = agentbus_config::load(
        cli.config.as_deref(),
        CliOverrides {
            bus_root: cli.bus_root.clone(),
            roster_path: cli.roster.clone(),
            suspicious_content_policy: None,
        },
    )
    .context("loading worker configuration")?;
    for warning in agentbus_config::validate(&settings).context("validating worker configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let roster = agentbus_roster::load(settings.roster_path.as_deref().map(std::path::Path::new))
        .context("loading roster")?;
    if !roster.knows(&cli.agent) {
        anyhow::bail!("agent '{}' is not present in the roster", cli.agent);
    }

    let bus = BusStorage::new(&settings.bus_root);
    bus.ensure_bus_root(&roster).context("preparing bus root")?;
    let receipts = ReceiptStore::new(&settings.bus_root);

    let lock_path = bus.root().join("state/worker-locks").join(format!("{}.lock", cli.agent));
    let worker_lock = match agentbus_lock::acquire(lock_path, 3).context("acquiring worker lock")? {
        Ok(lock) => lock,
        Err(outcome) => {
            anyhow::bail!("worker lock for '{}' is held by a live process: {outcome:?}", cli.agent);
        }
    };

    let repo_path = cli.repo_path.unwrap_or(std::env::current_dir().context("resolving current directory")?);
    let config = WorkerConfig {
        agent: cli.agent.clone(),
        repo_path,
        engine_program: cli.engine_program,
        engine_args: cli.engine_args,
        known_agents: roster.agent_names(),
        orchestrator_name: roster.orchestrator_name.clone(),
        autopilot_name: roster.autopilot_name.clone(),
    };
    let launcher = CommandEngineLauncher;

    loop {
        let results = run_pending(&bus, &receipts, &settings, &config, &launcher)
            .await
            .context("running pending tasks")?;
        for (id, outcome) in &results {
            tracing::info!(agent = %config.agent, id, ?outcome, "task processed");
        }
        if cli.once {
            break;
        }
        if results.is_empty() {
            tokio::time::sleep(Duration::from_secs(cli.poll_interval_secs)).await;
        }
    }

    worker_lock.release().context("releasing worker lock")?;
    Ok(())
}
