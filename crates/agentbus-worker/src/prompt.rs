// SPDX-License-Identifier: MIT OR Apache-2.0
//! The prompt envelope handed to the engine on stdin, and the structured
//! artifact the engine is expected to write back (spec §4.7 steps f-h).
//!
//! The worker never parses free-form engine prose: everything it acts on
//! comes from [`EngineOutput`], validated against a schema before a single
//! field of it is trusted.

use agentbus_core::{Outcome, PacketKind};
use agentbus_review_gate::ReviewEvidence;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One follow-up the engine asks the worker to dispatch on its behalf
/// (spec §4.11). Translated into an [`agentbus_bus::FollowUpSpec`] by the
/// supervisor once the parent packet is known.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineFollowUp {
    /// Recipients of the child packet.
    pub to: Vec<String>,
    /// Single-line summary.
    pub title: String,
    /// Free-form body.
    pub body: String,
    /// Workflow kind for the child, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PacketKind>,
    /// Workflow phase for the child, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Priority override; defaults to the parent's when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// The structured artifact an engine attempt writes to its `artifact_path`
/// (spec §4.7 step h "Completed", §8 scenario 1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutput {
    /// Closure outcome the engine believes applies.
    pub outcome: Outcome,
    /// Commit produced by the attempt, if the task made one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Free-form closing note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Child packets to dispatch on closure (spec §4.11).
    #[serde(default)]
    pub follow_ups: Vec<EngineFollowUp>,
    /// Review evidence, required only when the task is review-required
    /// (spec §4.8).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewEvidence>,
}

/// Render the text handed to the engine on stdin: the packet as-is plus the
/// output contract and, on a corrective retry, the reason the prior attempt
/// was rejected (spec §4.7 step i, §4.8 "single permitted retry").
#[must_use]
pub fn build_prompt_envelope(packet_raw: &str, retry_reason: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(packet_raw);
    out.push_str(
        "\n---\nWrite your structured result as JSON to the artifact path you were given. \
         The JSON must match the EngineOutput contract: outcome, commitSha?, note?, \
         followUps[], review?.\n",
    );
    if let Some(reason) = retry_reason {
        out.push_str("\nThe previous attempt was rejected for the following reason; correct it:\n");
        out.push_str(reason);
        out.push('\n');
    }
    out
}
