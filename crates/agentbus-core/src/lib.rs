// SPDX-License-Identifier: MIT OR Apache-2.0
//! agentbus-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for AgentBus: the packet a producer writes, the
//! receipt a worker writes back, and the roster that ties agent names to
//! working directories and skills.
//!
//! If you only take one dependency from this workspace, take this one.

/// Receipt hash chaining for tamper-evident receipt stores.
pub mod chain;
/// The shared error catalog (`AB-X###` codes) used across every crate.
pub mod error;
/// Structural validation of packet headers.
pub mod validate;
/// Receipt and chain verification helpers.
pub mod verify;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub use error::{BusError, BusErrorCode};

/// Current contract version string embedded in every rendered packet.
pub const CONTRACT_VERSION: &str = "agentbus/v1";

/// Default cap on follow-up packets a single closure may dispatch (spec §4.11).
pub const DEFAULT_FOLLOW_UP_CAP: usize = 5;

/// The kind of workflow event a packet represents.
///
/// Closed set — new kinds require a contract version bump, never silent
/// addition of an "other" catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketKind {
    /// A human request entering the system through the chat front-end.
    UserRequest,
    /// A request for a plan before any code changes happen.
    PlanRequest,
    /// Instructs a worker to execute a task.
    Execute,
    /// A mid-flight status nudge from the orchestrator to a worker.
    OrchestratorUpdate,
    /// Emitted by a worker on closure; consumed by the orchestrator.
    TaskComplete,
    /// Orchestrator → autopilot: review evidence is required before closure.
    ReviewActionRequired,
    /// Request to consult a higher-tier model for a hard decision.
    OpusConsultRequest,
    /// Response to an [`PacketKind::OpusConsultRequest`].
    OpusConsultResponse,
    /// A throttled progress ping, e.g. during a cooldown wait.
    Status,
}

/// Closure outcome recorded on a [`Receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The task completed successfully.
    Done,
    /// The task could not proceed (sandbox permission, git preflight, timeout).
    Blocked,
    /// The task failed outright (e.g. a second review-gate failure).
    Failed,
    /// The task completed but needs human or follow-up review (quality gate).
    NeedsReview,
    /// The task was cancelled externally before an attempt completed.
    Skipped,
}

/// The git contract carried in `references.git`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitContract {
    /// Branch the work branch is cut from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Commit the work branch must be an ancestor-reachable descendant of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
    /// Branch the worker checks out (or creates) before running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_branch: Option<String>,
    /// Shared branch results are integrated into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_branch: Option<String>,
    /// Where a successful integration is expected to deploy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_deploy: Option<String>,
}

/// `signals.reviewTarget` — what a review-required packet asks to be reviewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTarget {
    /// Commit sha the review must be computed against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// The task id that produced the commit under review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_task_id: Option<String>,
    /// The agent that produced the commit under review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    /// Path to the receipt of the task under review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_path: Option<String>,
    /// The packet kind that produced the commit under review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<PacketKind>,
}

/// The recognized `signals` sub-object. Unknown keys are preserved separately
/// in [`PacketHeader::signals_extra`] so a round-trip never drops data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    /// What kind of workflow event this packet represents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PacketKind>,
    /// Free-form workflow phase label (e.g. `"plan"`, `"implement"`, `"review"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Identity of the workflow this packet belongs to. Defaults to the
    /// packet's own id when absent (spec §3 invariant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    /// Immediate parent packet id. Defaults to `root_id` for non-`USER_REQUEST`
    /// packets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Marks this packet as part of a smoke-test workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<bool>,
    /// Whether closure should notify the orchestrator. Defaults to `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_orchestrator: Option<bool>,
    /// Whether the review gate applies before this packet may close `done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_required: Option<bool>,
    /// What commit/task the review gate should validate against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_target: Option<ReviewTarget>,
    /// Legacy fallback field used to infer review-required status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<PacketKind>,
    /// Any signal fields not recognized above, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Signals {
    /// `true` when this packet requires the review gate (spec §4.8).
    #[must_use]
    pub fn requires_review(&self, references: &References) -> bool {
        if self.review_required == Some(true) {
            return true;
        }
        self.source_kind == Some(PacketKind::TaskComplete)
            && references.completed_task_kind == Some(PacketKind::Execute)
    }

    /// `true` unless explicitly disabled.
    #[must_use]
    pub fn should_notify_orchestrator(&self) -> bool {
        self.notify_orchestrator.unwrap_or(true)
    }
}

/// The recognized `references` sub-object. Unknown keys round-trip via
/// [`References::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct References {
    /// Git contract for EXECUTE-kind tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitContract>,
    /// Path to a receipt this packet references (review gate, TASK_COMPLETE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_path: Option<String>,
    /// Commit sha this packet references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Task id this packet references (e.g. the task a follow-up originates from).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_task_id: Option<String>,
    /// Parent task id, set automatically on dispatched follow-ups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Parent root id, set automatically on dispatched follow-ups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_root_id: Option<String>,
    /// Legacy fallback: the kind of the task whose completion this packet reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_task_kind: Option<PacketKind>,
    /// Any reference fields not recognized above, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The structured header of a packet (the JSON object between the `---`
/// delimiters, spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PacketHeader {
    /// Safe identifier, unique per recipient: `^[A-Za-z0-9][A-Za-z0-9._-]{0,200}$`.
    pub id: String,
    /// Ordered, non-empty list of recipient agent names.
    pub to: Vec<String>,
    /// Sender agent name.
    pub from: String,
    /// Opaque priority label (e.g. `P0`..`P3`).
    pub priority: String,
    /// Single-line human summary.
    pub title: String,
    /// Workflow signals.
    #[serde(default)]
    pub signals: Signals,
    /// Cross-references to other packets, receipts, and the git contract.
    #[serde(default)]
    pub references: References,
    /// Any header fields not recognized above, preserved verbatim for
    /// forward compatibility (spec §4.1).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PacketHeader {
    /// Effective root id: the header's own id when `signals.root_id` is unset.
    #[must_use]
    pub fn effective_root_id(&self) -> &str {
        self.signals.root_id.as_deref().unwrap_or(&self.id)
    }

    /// Effective parent id: `root_id` for every non-`USER_REQUEST` packet
    /// when `signals.parent_id` is unset (spec §3 invariant).
    #[must_use]
    pub fn effective_parent_id(&self) -> &str {
        if let Some(p) = self.signals.parent_id.as_deref() {
            return p;
        }
        if self.signals.kind == Some(PacketKind::UserRequest) {
            return &self.id;
        }
        self.effective_root_id()
    }
}

/// A parsed packet: header plus free-form body.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Packet {
    /// Structured header.
    pub header: PacketHeader,
    /// Free-form body text, always terminated with a trailing newline.
    pub body: String,
}

/// Extension carried alongside a receipt: gate evidence, git snapshot, and
/// dispatched follow-ups. Open by design (spec §3).
pub type ReceiptExtra = BTreeMap<String, serde_json::Value>;

/// Idempotent, write-once closure record keyed by `(agent, task_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Agent that closed the task.
    pub agent: String,
    /// Task id that was closed.
    pub task_id: String,
    /// Closure outcome.
    pub outcome: Outcome,
    /// Free-form closing note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Commit produced by the closing attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Wall-clock closure time, RFC 3339.
    pub closed_at: chrono::DateTime<chrono::Utc>,
    /// Snapshot of the originating packet's header at closure time.
    pub packet_snapshot: PacketHeaderSnapshot,
    /// Open extension bag (gate evidence, git snapshot, follow-up dispatch records).
    #[serde(default)]
    pub receipt_extra: ReceiptExtra,
}

/// A trimmed, serialization-stable snapshot of a [`PacketHeader`] embedded
/// in a [`Receipt`]. Kept separate from `PacketHeader` so receipt shape does
/// not shift every time the live header contract grows a field.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PacketHeaderSnapshot {
    /// Task id.
    pub id: String,
    /// Recipients at closure time.
    pub to: Vec<String>,
    /// Sender.
    pub from: String,
    /// Priority label.
    pub priority: String,
    /// Title.
    pub title: String,
    /// Root id of the workflow.
    pub root_id: String,
    /// Parent id.
    pub parent_id: String,
    /// Packet kind, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PacketKind>,
    /// Workflow phase, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl From<&PacketHeader> for PacketHeaderSnapshot {
    fn from(h: &PacketHeader) -> Self {
        Self {
            id: h.id.clone(),
            to: h.to.clone(),
            from: h.from.clone(),
            priority: h.priority.clone(),
            title: h.title.clone(),
            root_id: h.effective_root_id().to_string(),
            parent_id: h.effective_parent_id().to_string(),
            kind: h.signals.kind,
            phase: h.signals.phase.clone(),
        }
    }
}

/// Canonical SHA-256 hash of a receipt's content, used for the receipt chain
/// (spec §8 idempotence laws; see [`chain`]).
///
/// Hashes the canonical JSON encoding (sorted keys via `BTreeMap`/serde
/// struct field order) so the same receipt always hashes identically
/// regardless of which process wrote it.
#[must_use]
pub fn receipt_hash(receipt: &Receipt) -> String {
    let canonical =
        serde_json::to_vec(receipt).expect("Receipt serialization is infallible by construction");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

/// One entry in a [`Roster`]: an agent's identity, workdir template, branch,
/// and skill bindings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RosterAgent {
    /// Agent name, used as the inbox directory and packet `to`/`from` value.
    pub name: String,
    /// Coarse classification (`chat`, `orchestrator`, `autopilot`, `worker`, ...).
    #[serde(default)]
    pub kind: String,
    /// Workdir template, may contain `$NAME`-style placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Default git branch this agent works from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Skill bindings available to this agent.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Last known engine session id, if the engine supports session resumption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Static catalog of known agent identities and distinguished roles.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    /// Every known agent.
    pub agents: Vec<RosterAgent>,
    /// Name of the distinguished orchestrator agent.
    pub orchestrator_name: String,
    /// Name of the distinguished chat front-end agent.
    pub daddy_chat_name: String,
    /// Name of the distinguished autopilot agent.
    pub autopilot_name: String,
}

impl Roster {
    /// Union of every listed agent name plus the distinguished role names
    /// plus the literal `"daddy"` (spec §4.2).
    #[must_use]
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.iter().map(|a| a.name.clone()).collect();
        for extra in [
            self.orchestrator_name.as_str(),
            self.daddy_chat_name.as_str(),
            self.autopilot_name.as_str(),
            "daddy",
        ] {
            if !names.iter().any(|n| n == extra) {
                names.push(extra.to_string());
            }
        }
        names
    }

    /// Look up an agent by name.
    #[must_use]
    pub fn agent(&self, name: &str) -> Option<&RosterAgent> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Whether `name` is a known recipient (listed agent or distinguished role).
    #[must_use]
    pub fn knows(&self, name: &str) -> bool {
        self.agent_names().iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: PacketKind) -> PacketHeader {
        PacketHeader {
            id: "T1".into(),
            to: vec!["backend".into()],
            from: "autopilot".into(),
            priority: "P1".into(),
            title: "do the thing".into(),
            signals: Signals {
                kind: Some(kind),
                ..Default::default()
            },
            references: References::default(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn root_id_defaults_to_own_id() {
        let h = header(PacketKind::Execute);
        assert_eq!(h.effective_root_id(), "T1");
    }

    #[test]
    fn parent_id_defaults_to_root_for_non_user_request() {
        let h = header(PacketKind::Execute);
        assert_eq!(h.effective_parent_id(), "T1");
    }

    #[test]
    fn parent_id_defaults_to_own_id_for_user_request() {
        let h = header(PacketKind::UserRequest);
        assert_eq!(h.effective_parent_id(), "T1");
    }

    #[test]
    fn explicit_parent_id_wins() {
        let mut h = header(PacketKind::Execute);
        h.signals.root_id = Some("ROOT".into());
        h.signals.parent_id = Some("PARENT".into());
        assert_eq!(h.effective_root_id(), "ROOT");
        assert_eq!(h.effective_parent_id(), "PARENT");
    }

    #[test]
    fn review_required_via_explicit_flag() {
        let mut h = header(PacketKind::OrchestratorUpdate);
        h.signals.review_required = Some(true);
        assert!(h.signals.requires_review(&h.references));
    }

    #[test]
    fn review_required_via_legacy_fallback() {
        let mut h = header(PacketKind::OrchestratorUpdate);
        h.signals.source_kind = Some(PacketKind::TaskComplete);
        h.references.completed_task_kind = Some(PacketKind::Execute);
        assert!(h.signals.requires_review(&h.references));
    }

    #[test]
    fn review_not_required_by_default() {
        let h = header(PacketKind::OrchestratorUpdate);
        assert!(!h.signals.requires_review(&h.references));
    }

    #[test]
    fn roster_agent_names_includes_distinguished_roles_and_daddy() {
        let roster = Roster {
            agents: vec![RosterAgent {
                name: "backend".into(),
                kind: "worker".into(),
                workdir: None,
                branch: None,
                skills: vec![],
                session_id: None,
            }],
            orchestrator_name: "orchestrator".into(),
            daddy_chat_name: "chat".into(),
            autopilot_name: "autopilot".into(),
        };
        let names = roster.agent_names();
        assert!(names.contains(&"backend".to_string()));
        assert!(names.contains(&"orchestrator".to_string()));
        assert!(names.contains(&"chat".to_string()));
        assert!(names.contains(&"autopilot".to_string()));
        assert!(names.contains(&"daddy".to_string()));
    }

    #[test]
    fn unknown_header_fields_round_trip() {
        let mut h = header(PacketKind::Execute);
        h.extra.insert("futureField".into(), serde_json::json!(42));
        let raw = serde_json::to_string(&h).unwrap();
        let back: PacketHeader = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.extra.get("futureField"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn receipt_hash_is_deterministic() {
        let h = header(PacketKind::Execute);
        let receipt = Receipt {
            agent: "backend".into(),
            task_id: "T1".into(),
            outcome: Outcome::Done,
            note: None,
            commit_sha: Some("deadbeef".into()),
            closed_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            packet_snapshot: PacketHeaderSnapshot::from(&h),
            receipt_extra: BTreeMap::new(),
        };
        assert_eq!(receipt_hash(&receipt), receipt_hash(&receipt));
    }
}
