// SPDX-License-Identifier: MIT OR Apache-2.0
//! Closure and receipt (spec §4.10, "C10"): move a task to `processed`,
//! write its idempotent receipt, and optionally emit a `TASK_COMPLETE`
//! notice to the orchestrator. This is the sole automatic backward signal
//! in the system — every other cross-agent communication is driven by a
//! higher-level component dispatching through [`agentbus_bus::deliver`] or
//! [`agentbus_bus::dispatch_follow_ups`] directly.

use agentbus_bus::{BusStorage, TaskState};
use agentbus_codec::suspicious::SuspiciousPolicy;
use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_core::{
    Outcome, PacketHeader, PacketHeaderSnapshot, PacketKind, Receipt, ReceiptExtra, References,
    Signals,
};
use agentbus_receipt::{ReceiptStore, WriteOutcome};
use std::path::PathBuf;

/// Everything [`close`] needs beyond the task identity itself.
#[derive(Debug, Clone)]
pub struct CloseRequest<'a> {
    /// Agent the task is addressed to.
    pub agent: &'a str,
    /// Task id being closed.
    pub id: &'a str,
    /// Closure outcome.
    pub outcome: Outcome,
    /// Free-form closing note.
    pub note: Option<String>,
    /// Commit produced by the closing attempt, if any.
    pub commit_sha: Option<String>,
    /// Gate evidence, git snapshot, and follow-up dispatch records to fold
    /// into the receipt's open extension bag.
    pub receipt_extra: ReceiptExtra,
    /// Whether to notify the orchestrator on a newly-created receipt.
    pub notify_orchestrator: bool,
}

/// Result of a [`close`] call.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// Path to the written (or pre-existing) receipt file.
    pub receipt_path: PathBuf,
    /// Whether this call actually wrote the receipt, or found one already
    /// there from a prior closure of the same `(agent, id)`.
    pub write_outcome: WriteOutcome,
    /// Path of the `TASK_COMPLETE` notice delivered to the orchestrator, if
    /// any was sent.
    pub notice_path: Option<PathBuf>,
}

/// Close `request.id` for `request.agent`: move it to `processed` if it
/// isn't already, write the receipt with `O_EXCL` idempotency, and — only
/// on a newly-created receipt, and only when the orchestrator isn't the
/// agent closing its own task — deliver a `TASK_COMPLETE` notice.
///
/// A second call for the same `(agent, id)` is a no-op on both the receipt
/// and the notice (spec §8: "close; close == close").
///
/// # Errors
///
/// Returns [`BusError`] if the task cannot be found or moved, or if the
/// receipt/notice cannot be written.
pub fn close(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    request: CloseRequest<'_>,
    orchestrator_name: &str,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<CloseOutcome, BusError> {
    let (packet, _path) = bus.open_task(request.agent, request.id, false)?;
    let (state, _) = bus.find_task_path(request.agent, request.id)?;
    if state != TaskState::Processed {
        bus.move_task(request.agent, request.id, state, TaskState::Processed)?;
    }

    let receipt = Receipt {
        agent: request.agent.to_string(),
        task_id: request.id.to_string(),
        outcome: request.outcome,
        note: request.note,
        commit_sha: request.commit_sha.clone(),
        closed_at: chrono::Utc::now(),
        packet_snapshot: PacketHeaderSnapshot::from(&packet.header),
        receipt_extra: request.receipt_extra,
    };

    let (receipt_path, write_outcome) = receipts
        .write(&receipt)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, e.to_string()))?;

    let should_notify = request.notify_orchestrator
        && write_outcome == WriteOutcome::Created
        && request.agent != orchestrator_name;

    let notice_path = if should_notify {
        deliver_task_complete(
            bus,
            &packet.header,
            orchestrator_name,
            request.agent,
            &receipt_path,
            request.commit_sha.as_deref(),
            known_agents,
            policy,
        )?
        .into_iter()
        .next()
    } else {
        None
    };

    Ok(CloseOutcome {
        receipt_path,
        write_outcome,
        notice_path,
    })
}

/// Close a task whose file has vanished from every inbox state entirely —
/// external cancellation (spec §4.7 step 3a, §5 "Cancellation"). There is no
/// file left to move, so this writes the receipt directly from the last
/// header this worker read before the packet disappeared.
#[allow(clippy::too_many_arguments)]
pub fn close_vanished(
    bus: &BusStorage,
    receipts: &ReceiptStore,
    agent: &str,
    header: &PacketHeader,
    note: Option<String>,
    orchestrator_name: &str,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<CloseOutcome, BusError> {
    let receipt = Receipt {
        agent: agent.to_string(),
        task_id: header.id.clone(),
        outcome: Outcome::Skipped,
        note,
        commit_sha: None,
        closed_at: chrono::Utc::now(),
        packet_snapshot: PacketHeaderSnapshot::from(header),
        receipt_extra: ReceiptExtra::new(),
    };

    let (receipt_path, write_outcome) = receipts
        .write(&receipt)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, e.to_string()))?;

    let should_notify = write_outcome == WriteOutcome::Created && agent != orchestrator_name;
    let notice_path = if should_notify {
        deliver_task_complete(
            bus,
            header,
            orchestrator_name,
            agent,
            &receipt_path,
            None,
            known_agents,
            policy,
        )?
        .into_iter()
        .next()
    } else {
        None
    };

    Ok(CloseOutcome {
        receipt_path,
        write_outcome,
        notice_path,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn deliver_task_complete(
    bus: &BusStorage,
    completed: &PacketHeader,
    orchestrator_name: &str,
    closing_agent: &str,
    receipt_path: &std::path::Path,
    commit_sha: Option<&str>,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<Vec<PathBuf>, BusError> {
    let mut references = References {
        receipt_path: Some(receipt_path.display().to_string()),
        completed_task_kind: completed.signals.kind,
        ..References::default()
    };
    references.commit_sha = commit_sha.map(str::to_string);

    let mut signals = Signals {
        kind: Some(PacketKind::TaskComplete),
        phase: completed.signals.phase.clone(),
        root_id: Some(completed.effective_root_id().to_string()),
        parent_id: Some(completed.id.clone()),
        ..Signals::default()
    };
    signals.source_kind = completed.signals.kind;

    let notice = PacketHeader {
        id: uuid::Uuid::new_v4().to_string(),
        to: vec![orchestrator_name.to_string()],
        from: closing_agent.to_string(),
        priority: completed.priority.clone(),
        title: format!("TASK_COMPLETE: {}", completed.title),
        signals,
        references,
        extra: Default::default(),
    };

    let body = format!(
        "Task '{}' closed by '{}'.\nReceipt: {}\n",
        completed.id,
        closing_agent,
        receipt_path.display()
    );

    let result = agentbus_bus::deliver(bus, &notice, &body, known_agents, policy)?;
    Ok(result.paths)
}
