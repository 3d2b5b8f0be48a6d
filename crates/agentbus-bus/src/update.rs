// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mid-flight packet updates (spec §4.4).
//!
//! An update locates a task wherever it currently sits, merges a header
//! patch over the existing header, appends a timestamped note to the body,
//! and rewrites the file atomically. The rewrite's mtime is the signal a
//! running worker's watcher polls for (spec §4.7) — callers must not try to
//! preserve the original mtime.

use crate::{atomic_rewrite, BusStorage, TaskState};
use agentbus_core::error::BusErrorCode;
use agentbus_core::{BusError, PacketHeader};
use serde_json::Value;

/// A partial header patch applied by [`update`]. Only the fields set here
/// are touched; everything else on the existing header is left as-is.
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    /// New title, if the update should change it.
    pub title: Option<String>,
    /// New priority label, if the update should change it.
    pub priority: Option<String>,
    /// Key-wise merge into `signals`'s JSON object (existing keys are
    /// overwritten, others retained).
    pub signals_merge: Option<Value>,
    /// Key-wise merge into `references`'s JSON object.
    pub references_merge: Option<Value>,
}

/// Apply `patch` to the task `id` for `agent` and append a note to the body
/// recording who made the update and when.
///
/// # Errors
///
/// Returns [`BusErrorCode::AlreadyProcessed`] if the task has already
/// closed, or [`BusErrorCode::TaskNotFound`] if no matching file exists.
pub fn update(
    bus: &BusStorage,
    agent: &str,
    id: &str,
    patch: &UpdatePatch,
    updated_by: &str,
    note: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), BusError> {
    let (state, path) = bus.find_task_path(agent, id)?;
    if state == TaskState::Processed {
        return Err(BusError::new(
            BusErrorCode::AlreadyProcessed,
            format!("'{id}' is already processed for agent '{agent}'; cannot update"),
        ));
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("read {}: {e}", path.display())))?;
    let mut packet = agentbus_codec::parse(&raw)?;

    apply_patch(&mut packet.header, patch)?;
    packet.body.push_str(&format!(
        "\n---\n[update {now} by {updated_by}]\n{note}\n",
        now = now.to_rfc3339(),
    ));

    let rendered = agentbus_codec::render(&packet.header, &packet.body);
    atomic_rewrite(&path, &rendered)?;
    tracing::info!(agent, id, updated_by, "task updated");
    Ok(())
}

fn apply_patch(header: &mut PacketHeader, patch: &UpdatePatch) -> Result<(), BusError> {
    if let Some(title) = &patch.title {
        header.title = title.clone();
    }
    if let Some(priority) = &patch.priority {
        header.priority = priority.clone();
    }
    if let Some(merge) = &patch.signals_merge {
        let mut current = serde_json::to_value(&header.signals)
            .map_err(|e| BusError::new(BusErrorCode::InvalidSignalsOrReferences, e.to_string()))?;
        merge_object(&mut current, merge)?;
        header.signals = serde_json::from_value(current)
            .map_err(|e| BusError::new(BusErrorCode::InvalidSignalsOrReferences, e.to_string()))?;
    }
    if let Some(merge) = &patch.references_merge {
        let mut current = serde_json::to_value(&header.references)
            .map_err(|e| BusError::new(BusErrorCode::InvalidSignalsOrReferences, e.to_string()))?;
        merge_object(&mut current, merge)?;
        header.references = serde_json::from_value(current)
            .map_err(|e| BusError::new(BusErrorCode::InvalidSignalsOrReferences, e.to_string()))?;
    }
    Ok(())
}

fn merge_object(current: &mut Value, patch: &Value) -> Result<(), BusError> {
    let (Value::Object(current_map), Value::Object(patch_map)) = (current, patch) else {
        return Err(BusError::new(
            BusErrorCode::InvalidSignalsOrReferences,
            "update merge patch must be a JSON object",
        ));
    };
    for (k, v) in patch_map {
        current_map.insert(k.clone(), v.clone());
    }
    Ok(())
}
