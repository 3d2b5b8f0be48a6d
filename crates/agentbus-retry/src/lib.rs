// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-retry
//!
//! Retry classification and exponential backoff for worker attempts
//! (spec §4.5, §7). Only [`agentbus_core::error::BusErrorCode::retryable`]
//! codes are ever retried automatically — everything else either closes
//! the task or escalates.
//!
//! The backoff here takes a caller-supplied `jitter_unit` rather than
//! drawing its own randomness, so the policy stays a pure function and the
//! worker loop controls where entropy comes from.

use agentbus_core::error::BusErrorCode;
use std::time::Duration;

/// Classification of external-engine failure text into retry/cooldown policy.
pub mod classify;
pub use classify::{classify as classify_failure, parse_retry_after_hint, FailureClass};

/// Exponential backoff with a full-jitter cap (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay for the first retry (`attempt == 0`).
    pub base: Duration,
    /// Hard ceiling on any computed delay.
    pub max: Duration,
    /// Maximum number of retry attempts before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Default policy: 2s base, 5 minute cap, 3 attempts.
    #[must_use]
    pub fn default_policy() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
            max_attempts: 3,
        }
    }

    /// Full-jitter delay for `attempt` (0-indexed): a value drawn uniformly
    /// from `[0, min(max, base * 2^attempt)]`. `jitter_unit` selects the
    /// point in that range and must be in `[0.0, 1.0]`; out-of-range values
    /// are clamped.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let jitter_unit = jitter_unit.clamp(0.0, 1.0);
        let exp_millis = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped_millis = exp_millis.min(self.max.as_millis());
        let jittered_millis = (capped_millis as f64 * jitter_unit) as u128;
        Duration::from_millis(jittered_millis.min(self.max.as_millis()) as u64)
    }

    /// Whether a failure classified as `code`, on its `attempt`'th retry
    /// (0-indexed), should be retried at all.
    #[must_use]
    pub fn should_retry(&self, code: BusErrorCode, attempt: u32) -> bool {
        code.retryable() && attempt < self.max_attempts
    }
}
