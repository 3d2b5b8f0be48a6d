// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The shared AgentBus error catalog.
//!
//! Every error code follows the pattern `AB-X###` where `X` is the category
//! letter and `###` is a three-digit number:
//!
//! - **C** — Contract errors (malformed packet/receipt, bad id, unknown recipient)
//! - **Q** — Queue/state errors (claim/process conflicts, task-not-found)
//! - **G** — Gate errors (review gate, quality gate)
//! - **E** — Engine/process errors (rate limit, timeout, sandbox permission)
//! - **S** — System errors (bus root unavailable, roster missing, lock I/O)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of every AgentBus error code, organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusErrorCode {
    /// The packet id does not match the safe-id pattern.
    InvalidPacketId,
    /// The recipient list is empty, contains duplicates, or names an unknown agent.
    InvalidRecipients,
    /// A follow-up or delivery targets the dispatching agent itself.
    SelfTargetingRejected,
    /// The header delimiter pair is missing or malformed.
    MalformedHeader,
    /// The `signals`/`references` value is not a JSON object.
    InvalidSignalsOrReferences,
    /// The receipt could not be parsed or is structurally invalid.
    MalformedReceipt,
    /// The roster is empty or has an agent with no name.
    InvalidRoster,

    /// The task id was not found in any known state directory.
    TaskNotFound,
    /// The task is already `in_progress` and cannot be claimed again.
    AlreadyClaimed,
    /// The task is already `processed`; no further mutation permitted.
    AlreadyProcessed,
    /// Delivery was refused by the suspicious-content policy.
    SuspiciousContentBlocked,
    /// Too many follow-up items were submitted; excess truncated.
    FollowUpLimitExceeded,

    /// The review gate's structured evidence was missing or invalid.
    ReviewGateFailure,
    /// The code-quality gate found one or more blocking violations.
    QualityGateFailure,
    /// The engine's structured output did not match the expected schema.
    OutputSchemaInvalid,

    /// The engine invocation was rate-limited by the provider.
    EngineRateLimited,
    /// The engine's output stream disconnected mid-run.
    EngineStreamDisconnected,
    /// The engine did not complete before the watchdog timeout.
    EngineTimeout,
    /// The running engine was superseded by a mid-flight packet update.
    EngineSuperseded,
    /// The engine was denied a sandbox permission it required.
    SandboxPermission,
    /// The git preflight could not establish the required branch/ancestry state.
    GitPreflightBlocked,

    /// The bus root directory could not be created or is not writable.
    BusRootUnavailable,
    /// The roster file could not be loaded.
    RosterUnavailable,
    /// A worker lock file could not be created, read, or released.
    LockIoFailure,
}

impl BusErrorCode {
    /// Stable `AB-X###` string tag for this code.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::InvalidPacketId => "AB-C001",
            Self::InvalidRecipients => "AB-C002",
            Self::SelfTargetingRejected => "AB-C003",
            Self::MalformedHeader => "AB-C004",
            Self::InvalidSignalsOrReferences => "AB-C005",
            Self::MalformedReceipt => "AB-C006",
            Self::InvalidRoster => "AB-C007",

            Self::TaskNotFound => "AB-Q001",
            Self::AlreadyClaimed => "AB-Q002",
            Self::AlreadyProcessed => "AB-Q003",
            Self::SuspiciousContentBlocked => "AB-Q004",
            Self::FollowUpLimitExceeded => "AB-Q005",

            Self::ReviewGateFailure => "AB-G001",
            Self::QualityGateFailure => "AB-G002",
            Self::OutputSchemaInvalid => "AB-G003",

            Self::EngineRateLimited => "AB-E001",
            Self::EngineStreamDisconnected => "AB-E002",
            Self::EngineTimeout => "AB-E003",
            Self::EngineSuperseded => "AB-E004",
            Self::SandboxPermission => "AB-E005",
            Self::GitPreflightBlocked => "AB-E006",

            Self::BusRootUnavailable => "AB-S001",
            Self::RosterUnavailable => "AB-S002",
            Self::LockIoFailure => "AB-S003",
        }
    }

    /// Whether an error of this code is ever safe to retry automatically.
    ///
    /// Mirrors spec §7's propagation policy: rate limit and stream
    /// disconnects retry; everything else either closes the task or
    /// escalates to a human.
    #[must_use]
    pub const fn retryable(self) -> bool {
        matches!(self, Self::EngineRateLimited | Self::EngineStreamDisconnected)
    }
}

impl fmt::Display for BusErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The shared AgentBus error type: a stable code plus a human message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct BusError {
    /// Stable machine-readable code.
    pub code: BusErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl BusError {
    /// Construct a new error with the given code and message.
    pub fn new(code: BusErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
