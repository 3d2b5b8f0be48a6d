// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `agentbus`: the command-line control surface for the packet bus
//! (spec §6, SPEC_FULL §B). A thin clap front-end over [`commands`]; every
//! piece of actual behavior lives there so it can be tested without a
//! process boundary.

mod commands;
mod format;

use agentbus_bus::update::UpdatePatch;
use agentbus_bus::BusStorage;
use agentbus_config::CliOverrides;
use agentbus_core::{PacketKind, References, Signals};
use agentbus_receipt::ReceiptStore;
use agentbus_worker::CloseRequest;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::SchemaKind;
use format::OutputFormat;
use std::io::Read as _;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agentbus", version, about = "Control surface for the AgentBus packet bus")]
struct Cli {
    /// Bus filesystem root (overrides config/env).
    #[arg(long, global = true)]
    bus_root: Option<String>,

    /// Roster JSON path (overrides config/env).
    #[arg(long, global = true)]
    roster: Option<String>,

    /// Optional TOML config file, layered beneath CLI/env overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit debug-level tracing to stderr.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create every inbox state directory for every roster agent.
    Init,
    /// Show per-agent inbox counts across the four lifecycle states.
    Status {
        #[arg(long, default_value = "lines")]
        format: OutputFormat,
    },
    /// List the most recently closed receipts.
    Recent {
        /// Restrict to one agent; omit for every agent.
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value = "lines")]
        format: OutputFormat,
    },
    /// List open (non-processed) tasks.
    OpenTasks {
        /// Restrict to one agent; omit for every agent.
        #[arg(long)]
        agent: Option<String>,
        /// Restrict to one workflow root id.
        #[arg(long)]
        root_id: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value = "lines")]
        format: OutputFormat,
    },
    /// Deliver an already-rendered packet document (`---` header, body).
    Send {
        /// Path to the packet document; `-` reads stdin.
        file: String,
    },
    /// Build and deliver a packet from discrete fields.
    SendText {
        #[arg(long)]
        id: String,
        /// Recipient agent names, repeatable.
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        #[arg(long)]
        from: String,
        #[arg(long, default_value = "P2")]
        priority: String,
        #[arg(long)]
        title: String,
        #[arg(long, conflicts_with_all = ["body_file", "body_stdin"])]
        body: Option<String>,
        #[arg(long, conflicts_with_all = ["body", "body_stdin"])]
        body_file: Option<PathBuf>,
        #[arg(long, conflicts_with_all = ["body", "body_file"])]
        body_stdin: bool,
        /// Packet kind signal (e.g. `execute`, `user_request`).
        #[arg(long)]
        kind: Option<String>,
        /// Free-form workflow phase label.
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        root_id: Option<String>,
        #[arg(long)]
        parent_id: Option<String>,
        /// Extra signals, merged as a raw JSON object.
        #[arg(long)]
        signals_json: Option<String>,
        /// Extra references, merged as a raw JSON object.
        #[arg(long)]
        references_json: Option<String>,
        /// Mark this packet as part of a smoke-test workflow.
        #[arg(long)]
        smoke: bool,
    },
    /// Apply a mid-flight patch and append a note to an open task.
    Update {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        updated_by: String,
        #[arg(long, conflicts_with_all = ["append_file", "append_stdin"])]
        append: Option<String>,
        #[arg(long, conflicts_with_all = ["append", "append_stdin"])]
        append_file: Option<PathBuf>,
        #[arg(long, conflicts_with_all = ["append", "append_file"])]
        append_stdin: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        signals_json: Option<String>,
        #[arg(long)]
        references_json: Option<String>,
    },
    /// Read a task, marking it `seen` unless suppressed.
    Open {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        no_mark_seen: bool,
    },
    /// Close a task with a receipt and conditional `TASK_COMPLETE` notice.
    Close {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        id: String,
        /// `done`, `blocked`, `failed`, `needs_review`, or `skipped`.
        #[arg(long, default_value = "done")]
        outcome: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        commit_sha: Option<String>,
        #[arg(long)]
        no_notify_orchestrator: bool,
    },
    /// Print the JSON Schema for a contract type.
    Schema {
        /// `packet`, `receipt`, or `config`.
        kind: String,
    },
    /// Structurally validate a standalone packet document.
    Validate {
        /// Path to the packet document; `-` reads stdin.
        file: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let settings = agentbus_config::load(
        cli.config.as_deref(),
        CliOverrides {
            bus_root: cli.bus_root.clone(),
            roster_path: cli.roster.clone(),
            suspicious_content_policy: None,
        },
    )
    .context("loading configuration")?;
    for warning in agentbus_config::validate(&settings).context("validating configuration")? {
        tracing::warn!(%warning, "configuration warning");
    }

    let roster = agentbus_roster::load(settings.roster_path.as_deref().map(std::path::Path::new))
        .context("loading roster")?;
    let known_agents = roster.agent_names();
    let policy = settings.suspicious_content_policy;

    let bus = BusStorage::new(&settings.bus_root);
    let receipts = ReceiptStore::new(&settings.bus_root);

    match cli.command {
        Command::Init => {
            commands::init(&bus, &roster)?;
            println!("initialized bus root at {}", bus.root().display());
        }
        Command::Status { format } => {
            let rows = commands::status(&bus, &roster)?;
            println!("{}", format::format_status(&rows, format));
        }
        Command::Recent { agent, limit, format } => {
            let rows = commands::recent(&receipts, agent.as_deref(), limit)?;
            println!("{}", format::format_receipts(&rows, format));
        }
        Command::OpenTasks { agent, root_id, limit, format } => {
            let rows = commands::open_tasks(&bus, &roster, agent.as_deref(), root_id.as_deref(), limit)?;
            println!("{}", format::format_open_tasks(&rows, format));
        }
        Command::Send { file } => {
            let raw = read_input(&file)?;
            match commands::send(&bus, &raw, &known_agents, policy) {
                Ok(result) => println!("delivered to {} recipient(s)", result.paths.len()),
                Err(e) if e.code == agentbus_core::BusErrorCode::SuspiciousContentBlocked => {
                    eprintln!("blocked: {e}");
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::SendText {
            id,
            to,
            from,
            priority,
            title,
            body,
            body_file,
            body_stdin,
            kind,
            phase,
            root_id,
            parent_id,
            signals_json,
            references_json,
            smoke,
        } => {
            let body = resolve_body(body, body_file, body_stdin)?;
            let signals = build_signals(kind.as_deref(), phase, root_id, parent_id, smoke, signals_json)?;
            let references = merge_references(references_json)?;
            match commands::send_text(
                &bus,
                &id,
                to,
                &from,
                &priority,
                &title,
                &body,
                signals,
                references,
                &known_agents,
                policy,
            ) {
                Ok(result) => println!("delivered to {} recipient(s)", result.paths.len()),
                Err(e) if e.code == agentbus_core::BusErrorCode::SuspiciousContentBlocked => {
                    eprintln!("blocked: {e}");
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Update {
            agent,
            id,
            updated_by,
            append,
            append_file,
            append_stdin,
            title,
            priority,
            signals_json,
            references_json,
        } => {
            let note = resolve_body(append, append_file, append_stdin)?;
            let patch = UpdatePatch {
                title,
                priority,
                signals_merge: signals_json.map(|s| serde_json::from_str(&s)).transpose()?,
                references_merge: references_json.map(|s| serde_json::from_str(&s)).transpose()?,
            };
            commands::update(&bus, &agent, &id, &patch, &updated_by, &note)?;
            println!("updated '{id}' for '{agent}'");
        }
        Command::Open { agent, id, no_mark_seen } => {
            let packet = commands::open(&bus, &agent, &id, !no_mark_seen)?;
            println!("{}", serde_json::to_string_pretty(&packet)?);
        }
        Command::Close {
            agent,
            id,
            outcome,
            note,
            commit_sha,
            no_notify_orchestrator,
        } => {
            let outcome: agentbus_core::Outcome =
                serde_json::from_value(serde_json::Value::String(outcome.clone()))
                    .with_context(|| format!("'{outcome}' is not a recognized outcome"))?;
            let request = CloseRequest {
                agent: &agent,
                id: &id,
                outcome,
                note,
                commit_sha,
                receipt_extra: Default::default(),
                notify_orchestrator: !no_notify_orchestrator,
            };
            let result = commands::close_task(
                &bus,
                &receipts,
                request,
                &roster.orchestrator_name,
                &known_agents,
                policy,
            )?;
            println!("receipt: {}", result.receipt_path.display());
            if let Some(notice) = result.notice_path {
                println!("notice: {}", notice.display());
            }
        }
        Command::Schema { kind } => {
            let kind: SchemaKind = kind.parse().map_err(anyhow::Error::msg)?;
            println!("{}", commands::schema_json(kind)?);
        }
        Command::Validate { file } => {
            let raw = read_input(&file)?;
            match commands::validate_packet_document(&raw) {
                Ok(()) => println!("valid"),
                Err(e) => {
                    eprintln!("invalid: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))
    }
}

fn resolve_body(inline: Option<String>, file: Option<PathBuf>, stdin: bool) -> Result<String> {
    if let Some(b) = inline {
        return Ok(b);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()));
    }
    if stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    anyhow::bail!("one of --body, --body-file, or --body-stdin is required")
}

fn build_signals(
    kind: Option<&str>,
    phase: Option<String>,
    root_id: Option<String>,
    parent_id: Option<String>,
    smoke: bool,
    extra_json: Option<String>,
) -> Result<Signals> {
    let mut signals = Signals {
        phase,
        root_id,
        parent_id,
        smoke: smoke.then_some(true),
        ..Signals::default()
    };
    if let Some(kind) = kind {
        signals.kind = Some(parse_packet_kind(kind)?);
    }
    if let Some(raw) = extra_json {
        let mut value = serde_json::to_value(&signals)?;
        merge_json_object(&mut value, &serde_json::from_str(&raw)?)?;
        signals = serde_json::from_value(value)?;
    }
    Ok(signals)
}

fn merge_references(extra_json: Option<String>) -> Result<References> {
    let Some(raw) = extra_json else {
        return Ok(References::default());
    };
    let mut value = serde_json::to_value(References::default())?;
    merge_json_object(&mut value, &serde_json::from_str(&raw)?)?;
    Ok(serde_json::from_value(value)?)
}

fn merge_json_object(current: &mut serde_json::Value, patch: &serde_json::Value) -> Result<()> {
    let (serde_json::Value::Object(current_map), serde_json::Value::Object(patch_map)) = (current, patch) else {
        anyhow::bail!("--signals-json/--references-json must be a JSON object");
    };
    for (k, v) in patch_map {
        current_map.insert(k.clone(), v.clone());
    }
    Ok(())
}

fn parse_packet_kind(s: &str) -> Result<PacketKind> {
    let normalized = format!("\"{}\"", s.to_ascii_uppercase());
    serde_json::from_str(&normalized).with_context(|| format!("'{s}' is not a recognized packet kind"))
}
