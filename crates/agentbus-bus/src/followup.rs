// SPDX-License-Identifier: MIT OR Apache-2.0
//! Follow-up dispatch (spec §4.11, "C11"): a completing worker may enqueue
//! up to `K` child packets on its own behalf. Lineage (`rootId`/`parentId`,
//! `references.parentTaskId`/`parentRootId`) is assigned automatically; each
//! child goes through the same [`deliver`] path as any externally produced
//! packet, so self-targeting and unknown-recipient rejection are enforced
//! exactly once, in one place.

use crate::{deliver, BusStorage};
use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_core::{PacketHeader, References, Signals};
use agentbus_codec::suspicious::SuspiciousPolicy;
use std::collections::BTreeMap;

/// One child packet a completing worker asks to dispatch.
#[derive(Debug, Clone)]
pub struct FollowUpSpec {
    /// Recipients of the child packet.
    pub to: Vec<String>,
    /// Single-line summary.
    pub title: String,
    /// Free-form body.
    pub body: String,
    /// Workflow signals for the child; `kind` and `phase` are the fields the
    /// spec calls out as required.
    pub signals: Signals,
    /// Cross-references for the child. `parent_task_id`/`parent_root_id` are
    /// overwritten unconditionally by [`dispatch_follow_ups`].
    pub references: References,
    /// Opaque priority label; defaults to the parent's priority when `None`.
    pub priority: Option<String>,
}

/// One item's dispatch failure, keyed by its position in the input slice.
#[derive(Debug, Clone)]
pub struct FollowUpError {
    /// Index into the original `items` slice.
    pub index: usize,
    /// The classified failure.
    pub error: BusError,
}

/// Result of a [`dispatch_follow_ups`] call.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Ids assigned to successfully dispatched children, in input order.
    pub dispatched_ids: Vec<String>,
    /// Per-item failures for specs that were attempted but rejected.
    pub errors: Vec<FollowUpError>,
    /// How many trailing items were dropped because `items.len() > cap`.
    pub truncated: usize,
}

/// Dispatch up to `cap` (default [`agentbus_core::DEFAULT_FOLLOW_UP_CAP`])
/// follow-up packets on behalf of `parent`, the packet whose closure is
/// producing them.
///
/// Each spec is assigned a fresh id, has its `rootId`/`parentId` defaulted
/// from `parent` when unset, and has `references.parentTaskId`/`parentRootId`
/// set to `parent`'s effective ids. Items beyond `cap` are not attempted at
/// all and are folded into [`DispatchOutcome::truncated`].
pub fn dispatch_follow_ups(
    bus: &BusStorage,
    parent: &PacketHeader,
    items: &[FollowUpSpec],
    known_agents: &[String],
    policy: SuspiciousPolicy,
    cap: usize,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    let (in_scope, excess) = if items.len() > cap {
        (&items[..cap], items.len() - cap)
    } else {
        (items, 0)
    };
    outcome.truncated = excess;

    for (index, spec) in in_scope.iter().enumerate() {
        match dispatch_one(bus, parent, spec, known_agents, policy) {
            Ok(id) => outcome.dispatched_ids.push(id),
            Err(error) => outcome.errors.push(FollowUpError { index, error }),
        }
    }

    if excess > 0 {
        tracing::warn!(
            parent_id = %parent.id,
            cap,
            dropped = excess,
            "follow-up dispatch truncated: more items than the configured cap"
        );
    }

    outcome
}

fn dispatch_one(
    bus: &BusStorage,
    parent: &PacketHeader,
    spec: &FollowUpSpec,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<String, BusError> {
    let mut references = spec.references.clone();
    references.parent_task_id = Some(parent.id.clone());
    references.parent_root_id = Some(parent.effective_root_id().to_string());

    let mut signals = spec.signals.clone();
    if signals.root_id.is_none() {
        signals.root_id = Some(parent.effective_root_id().to_string());
    }
    if signals.parent_id.is_none() {
        signals.parent_id = Some(parent.id.clone());
    }

    let id = uuid::Uuid::new_v4().to_string();
    let header = PacketHeader {
        id,
        to: spec.to.clone(),
        from: parent.to_first_or_from(),
        priority: spec
            .priority
            .clone()
            .unwrap_or_else(|| parent.priority.clone()),
        title: spec.title.clone(),
        signals,
        references,
        extra: BTreeMap::new(),
    };

    deliver(bus, &header, &spec.body, known_agents, policy).map(|result| {
        tracing::info!(
            parent_id = %parent.id,
            follow_up_id = %header.id,
            to = ?header.to,
            "dispatched follow-up"
        );
        let _ = result;
        header.id
    })
}

impl PacketHeader {
    /// The agent considered to be "dispatching" a follow-up on this packet's
    /// behalf: the worker that is closing it, i.e. this packet's sole
    /// recipient in the common case of a directly-addressed task.
    fn to_first_or_from(&self) -> String {
        self.to.first().cloned().unwrap_or_else(|| self.from.clone())
    }
}
