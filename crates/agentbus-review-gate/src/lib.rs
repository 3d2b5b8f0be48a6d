// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-review-gate
//!
//! The review gate (spec §4.8, "C8"): the mandatory check a worker enforces
//! before closing a review-required task as `done`. A task is review-required
//! when it is addressed to the autopilot agent with `signals.kind =
//! ORCHESTRATOR_UPDATE` and either `signals.reviewRequired = true` or the
//! legacy fallback (`signals.sourceKind = TASK_COMPLETE` and
//! `references.completedTaskKind = EXECUTE`) — see
//! [`agentbus_core::Signals::requires_review`].
//!
//! When required, the engine's structured output must carry a `review`
//! object meeting [`ReviewEvidence`]'s shape; [`evaluate`] is the single
//! entry point the worker loop calls. On success it also produces the
//! canonical review artifact markdown via [`render_review_artifact`].

/// Canonical review-artifact markdown rendering.
pub mod artifact;

use agentbus_core::PacketKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use artifact::render_review_artifact;

/// Failure modes the review gate can report (spec §7 `ReviewGateFailure`,
/// `OutputSchemaInvalid`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReviewGateError {
    /// `review.ran` was `false`.
    #[error("review.ran was false")]
    NotRan,
    /// `review.method` was not `"built_in_review"`.
    #[error("review.method '{0}' is not 'built_in_review'")]
    WrongMethod(String),
    /// `review.targetCommitSha` did not match the packet's `reviewTarget.commitSha`.
    #[error("review.targetCommitSha '{actual}' does not match expected '{expected}'")]
    CommitShaMismatch {
        /// The sha carried in the review evidence.
        actual: String,
        /// The sha the packet's `signals.reviewTarget.commitSha` advertised.
        expected: String,
    },
    /// `review.summary` was empty.
    #[error("review.summary must not be empty")]
    EmptySummary,
    /// One or more required evidence sections were missing.
    #[error("review.evidence.sectionsPresent is missing: {0:?}")]
    MissingSections(Vec<&'static str>),
    /// `review.evidence.artifactPath` escaped the bus root.
    #[error("review.evidence.artifactPath '{0}' escapes the bus root")]
    ArtifactPathEscapesRoot(String),
    /// `verdict = changes_requested` but no corrective follow-up was offered.
    #[error("review.verdict was changes_requested but no corrective follow-up was provided")]
    ChangesRequestedWithoutFollowUp,
    /// The assistant text showed signs of a nested CLI re-invocation.
    #[error("assistant text shows a nested CLI re-invocation: matched '{0}'")]
    NestedCliReinvocation(String),
}

/// `review.verdict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// The review found nothing blocking.
    Pass,
    /// The review found blocking issues; at least one corrective follow-up
    /// must accompany this verdict.
    ChangesRequested,
}

/// `review.evidence`: pointer to the rendered artifact plus which sections
/// it contains.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvidenceDetail {
    /// Bus-root-relative path to the rendered review artifact.
    pub artifact_path: String,
    /// Which of the canonical sections the artifact actually contains.
    pub sections_present: Vec<String>,
}

/// The structured `review` object an engine must emit for a review-required
/// task (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvidence {
    /// Whether a review actually ran.
    pub ran: bool,
    /// Must be `"built_in_review"`.
    pub method: String,
    /// The commit sha the review was computed against.
    pub target_commit_sha: String,
    /// Non-empty human summary of the review.
    pub summary: String,
    /// Number of findings, zero or more.
    pub findings_count: u32,
    /// Pass or changes-requested.
    pub verdict: ReviewVerdict,
    /// Pointer to the rendered artifact and which sections it covers.
    pub evidence: ReviewEvidenceDetail,
    /// Raw assistant text accompanying the review, scanned for nested CLI
    /// re-invocation before the evidence is otherwise trusted.
    #[serde(default)]
    pub assistant_text: String,
    /// Whether a corrective follow-up accompanies a `changes_requested` verdict.
    #[serde(default)]
    pub has_corrective_follow_up: bool,
}

/// Sections every review artifact must cover (spec §4.8).
pub const REQUIRED_SECTIONS: &[&str] = &["findings", "severity", "file_refs", "actions"];

/// Substrings that indicate the assistant tried to shell out to another
/// copy of the CLI instead of doing the review inline (spec §4.8).
const NESTED_CLI_MARKERS: &[&str] = &[
    "codex review",
    "codex exec",
    "codex app-server",
    "codex resume",
];

/// Scan assistant text for evidence of a nested CLI re-invocation. Returns
/// the matched marker, if any.
#[must_use]
pub fn scan_for_nested_cli_reinvocation(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    NESTED_CLI_MARKERS.iter().copied().find(|m| lower.contains(m))
}

/// Whether a task is review-required per the autopilot/`ORCHESTRATOR_UPDATE`
/// contract (spec §4.8). This mirrors
/// [`agentbus_core::Signals::requires_review`] but additionally requires the
/// recipient to be the autopilot agent, which `Signals` alone cannot know.
#[must_use]
pub fn is_review_required(header: &agentbus_core::PacketHeader, autopilot_name: &str) -> bool {
    header.to.iter().any(|r| r == autopilot_name)
        && header.signals.kind == Some(PacketKind::OrchestratorUpdate)
        && header.signals.requires_review(&header.references)
}

/// Validate a full `review` object against the packet's advertised review
/// target and the bus root (for artifact path containment).
///
/// # Errors
///
/// Returns the first [`ReviewGateError`] found, checked in the order the
/// spec lists them: nested-CLI text, `ran`, `method`, commit sha match,
/// summary, sections, artifact path containment, and the
/// changes-requested/follow-up pairing.
pub fn evaluate(
    evidence: &ReviewEvidence,
    expected_commit_sha: &str,
    bus_root: &Path,
) -> Result<(), ReviewGateError> {
    if let Some(marker) = scan_for_nested_cli_reinvocation(&evidence.assistant_text) {
        return Err(ReviewGateError::NestedCliReinvocation(marker.to_string()));
    }
    if !evidence.ran {
        return Err(ReviewGateError::NotRan);
    }
    if evidence.method != "built_in_review" {
        return Err(ReviewGateError::WrongMethod(evidence.method.clone()));
    }
    if evidence.target_commit_sha != expected_commit_sha {
        return Err(ReviewGateError::CommitShaMismatch {
            actual: evidence.target_commit_sha.clone(),
            expected: expected_commit_sha.to_string(),
        });
    }
    if evidence.summary.trim().is_empty() {
        return Err(ReviewGateError::EmptySummary);
    }
    let missing: Vec<&'static str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|section| {
            !evidence
                .evidence
                .sections_present
                .iter()
                .any(|s| s == section)
        })
        .collect();
    if !missing.is_empty() {
        return Err(ReviewGateError::MissingSections(missing));
    }
    if path_escapes_root(bus_root, &evidence.evidence.artifact_path) {
        return Err(ReviewGateError::ArtifactPathEscapesRoot(
            evidence.evidence.artifact_path.clone(),
        ));
    }
    if evidence.verdict == ReviewVerdict::ChangesRequested && !evidence.has_corrective_follow_up {
        return Err(ReviewGateError::ChangesRequestedWithoutFollowUp);
    }
    Ok(())
}

/// `true` when `relative` is not a strictly-contained, non-absolute path
/// under `root` (no `..` components, no absolute path, no empty path).
fn path_escapes_root(root: &Path, relative: &str) -> bool {
    let candidate = Path::new(relative);
    if candidate.is_absolute() || relative.is_empty() {
        return true;
    }
    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return true;
    }
    let joined: PathBuf = root.join(candidate);
    !joined.starts_with(root)
}
