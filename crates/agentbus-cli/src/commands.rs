// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library implementations behind every `agentbus` subcommand (spec §6),
//! kept free of clap so each one is independently testable.

use agentbus_bus::{update::UpdatePatch, BusStorage, DeliveryResult, TaskState};
use agentbus_codec::suspicious::SuspiciousPolicy;
use agentbus_config::BusSettings;
use agentbus_core::{BusError, PacketHeader, Receipt, References, Roster, Signals};
use agentbus_receipt::ReceiptStore;
use agentbus_worker::{close, CloseOutcome, CloseRequest};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::format::{OpenTaskRow, StatusRow};

/// Materialize every inbox state directory for every roster agent.
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub fn init(bus: &BusStorage, roster: &Roster) -> Result<()> {
    bus.ensure_bus_root(roster)
        .context("preparing bus root directories")
}

/// Per-agent inbox counts across the four lifecycle states (spec §6 `status`).
///
/// # Errors
///
/// Returns an error if an inbox directory cannot be listed.
pub fn status(bus: &BusStorage, roster: &Roster) -> Result<Vec<StatusRow>> {
    let mut rows = Vec::new();
    for agent in roster.agent_names() {
        let new = bus.list_inbox_task_ids(&agent, TaskState::New)?.len();
        let seen = bus.list_inbox_task_ids(&agent, TaskState::Seen)?.len();
        let in_progress = bus.list_inbox_task_ids(&agent, TaskState::InProgress)?.len();
        let processed = bus.list_inbox_task_ids(&agent, TaskState::Processed)?.len();
        rows.push(StatusRow {
            agent,
            new,
            seen,
            in_progress,
            processed,
        });
    }
    Ok(rows)
}

/// The most recently closed receipts (spec §6 `recent`).
///
/// # Errors
///
/// Returns an error on I/O or parse failure reading the receipt store.
pub fn recent(receipts: &ReceiptStore, agent: Option<&str>, limit: usize) -> Result<Vec<Receipt>> {
    receipts
        .list_recent(agent, limit)
        .context("listing recent receipts")
}

/// Open (non-`processed`) tasks across every agent, or a single agent when
/// given (spec §6 `open-tasks`). Optionally filtered to one workflow root.
///
/// # Errors
///
/// Returns an error if a task file cannot be read or parsed.
pub fn open_tasks(
    bus: &BusStorage,
    roster: &Roster,
    agent: Option<&str>,
    root_id: Option<&str>,
    limit: usize,
) -> Result<Vec<OpenTaskRow>> {
    let agents: Vec<String> = match agent {
        Some(a) => vec![a.to_string()],
        None => roster.agent_names(),
    };

    let mut rows = Vec::new();
    'agents: for agent in agents {
        for state in [TaskState::New, TaskState::Seen, TaskState::InProgress] {
            for id in bus.list_inbox_task_ids(&agent, state)? {
                let (packet, _) = bus.open_task(&agent, &id, false)?;
                let effective_root = packet.header.effective_root_id().to_string();
                if let Some(want) = root_id {
                    if effective_root != want {
                        continue;
                    }
                }
                rows.push(OpenTaskRow {
                    agent: agent.clone(),
                    id: packet.header.id.clone(),
                    state: state.dirname().to_string(),
                    root_id: effective_root,
                    title: packet.header.title.clone(),
                    priority: packet.header.priority.clone(),
                });
                if rows.len() >= limit {
                    break 'agents;
                }
            }
        }
    }
    Ok(rows)
}

/// Deliver an already-rendered packet document (spec §6 `send`): parse it,
/// then write it into every recipient's `new/` directory.
///
/// # Errors
///
/// Returns a [`BusError`] if the document is malformed, addressed to an
/// unknown agent, or blocked by the suspicious-content policy.
pub fn send(
    bus: &BusStorage,
    raw: &str,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<DeliveryResult, BusError> {
    let packet = agentbus_codec::parse(raw)?;
    agentbus_bus::deliver(bus, &packet.header, &packet.body, known_agents, policy)
}

/// Build and send a packet from discrete fields (spec §6 `send-text`),
/// sparing the caller from hand-assembling the header JSON.
#[allow(clippy::too_many_arguments)]
pub fn send_text(
    bus: &BusStorage,
    id: &str,
    to: Vec<String>,
    from: &str,
    priority: &str,
    title: &str,
    body: &str,
    signals: Signals,
    references: References,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<DeliveryResult, BusError> {
    let header = PacketHeader {
        id: id.to_string(),
        to,
        from: from.to_string(),
        priority: priority.to_string(),
        title: title.to_string(),
        signals,
        references,
        extra: BTreeMap::new(),
    };
    agentbus_bus::deliver(bus, &header, body, known_agents, policy)
}

/// Apply a mid-flight patch plus an appended note to an open task (spec §6
/// `update`, spec §4.4).
///
/// # Errors
///
/// Returns [`BusError`] if the task is already processed or does not exist.
pub fn update(
    bus: &BusStorage,
    agent: &str,
    id: &str,
    patch: &UpdatePatch,
    updated_by: &str,
    note: &str,
) -> Result<(), BusError> {
    agentbus_bus::update::update(bus, agent, id, patch, updated_by, note, chrono::Utc::now())
}

/// Read a task, optionally promoting `new -> seen` (spec §6 `open`).
///
/// # Errors
///
/// Returns [`BusError`] if no matching task exists.
pub fn open(
    bus: &BusStorage,
    agent: &str,
    id: &str,
    mark_seen: bool,
) -> Result<agentbus_core::Packet, BusError> {
    bus.open_task(agent, id, mark_seen).map(|(packet, _)| packet)
}

/// Close a task with a receipt and conditional `TASK_COMPLETE` notice
/// (spec §6 `close`, spec §4.10).
///
/// # Errors
///
/// Returns [`BusError`] if the task cannot be found, moved, or receipted.
pub fn close_task(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    request: CloseRequest<'_>,
    orchestrator_name: &str,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<CloseOutcome, BusError> {
    close(bus, receipts, request, orchestrator_name, known_agents, policy)
}

/// Structural validation of a standalone packet document (spec §B `validate`).
///
/// # Errors
///
/// Returns a [`BusError`] describing the first structural problem found.
pub fn validate_packet_document(raw: &str) -> Result<(), BusError> {
    let packet = agentbus_codec::parse(raw)?;
    agentbus_codec::validate_header(&packet.header)
}

/// Which contract type a `schema` request names (spec §B `schema`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// [`agentbus_core::Packet`].
    Packet,
    /// [`agentbus_core::Receipt`].
    Receipt,
    /// [`agentbus_config::BusSettings`].
    Config,
}

impl std::str::FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "packet" => Ok(Self::Packet),
            "receipt" => Ok(Self::Receipt),
            "config" => Ok(Self::Config),
            other => Err(format!("unknown schema kind '{other}' (expected packet|receipt|config)")),
        }
    }
}

/// Render the requested contract type's JSON Schema, pretty-printed.
///
/// # Errors
///
/// Returns an error only if schema serialization itself fails, which does
/// not happen for these derived schemas in practice.
pub fn schema_json(kind: SchemaKind) -> Result<String> {
    let schema = match kind {
        SchemaKind::Packet => schemars::schema_for!(agentbus_core::Packet),
        SchemaKind::Receipt => schemars::schema_for!(agentbus_core::Receipt),
        SchemaKind::Config => schemars::schema_for!(BusSettings),
    };
    serde_json::to_string_pretty(&schema).context("serializing schema")
}
