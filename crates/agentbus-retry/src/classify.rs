// SPDX-License-Identifier: MIT OR Apache-2.0
//! Classification of external-engine failure text (spec §4.5, §7).
//!
//! The worker loop never inspects an engine's stderr/stdout directly; it
//! hands the combined text here and acts on the returned [`FailureClass`].
//! Only [`FailureClass::RateLimited`] installs a global cooldown.

use std::time::Duration;

/// How a failed engine invocation should be treated by the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The engine reported (or plausibly hit) a provider rate limit.
    /// Install or extend the global cooldown and retry with backoff.
    RateLimited,
    /// The engine's output stream disconnected mid-run. Retry with backoff,
    /// but do not install a cooldown — this is not evidence of rate limiting.
    StreamDisconnected,
    /// A sandbox denied the engine a capability it needed. Close as
    /// `blocked` with the hint; never retried.
    SandboxPermission,
    /// Anything else: surfaced as a generic failure, not auto-retried.
    Other,
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "429",
    "too many requests",
    "quota exceeded",
];

const STREAM_DISCONNECT_MARKERS: &[&str] = &[
    "stream disconnected",
    "connection reset",
    "broken pipe",
    "unexpected eof",
    "socket hang up",
];

const SANDBOX_PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "sandbox denied",
    "not permitted by sandbox",
];

/// Classify combined stderr/stdout text from a failed engine invocation.
///
/// Matching is case-insensitive substring search against a small marker
/// list; this is deliberately conservative (false negatives fall through to
/// [`FailureClass::Other`] rather than guessing).
#[must_use]
pub fn classify(combined_output: &str) -> FailureClass {
    let lower = combined_output.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureClass::RateLimited
    } else if SANDBOX_PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureClass::SandboxPermission
    } else if STREAM_DISCONNECT_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureClass::StreamDisconnected
    } else {
        FailureClass::Other
    }
}

/// Parse a `Retry-After`-style hint out of engine failure text, in seconds.
///
/// Recognizes `Retry-After: <seconds>` (HTTP-style) and free-text phrasing
/// like "try again in 30s" / "retry in 12000ms" / "try again in 2 minutes".
/// Returns `None` when no hint is found; the caller then falls back to its
/// own backoff policy.
#[must_use]
pub fn parse_retry_after_hint(combined_output: &str) -> Option<Duration> {
    let lower = combined_output.to_lowercase();

    if let Some(secs) = extract_after_prefix(&lower, "retry-after:") {
        return Some(Duration::from_secs(secs));
    }

    if let Some(pos) = lower.find("try again in ") {
        let tail = &lower[pos + "try again in ".len()..];
        if let Some(d) = parse_leading_duration(tail) {
            return Some(d);
        }
    }
    if let Some(pos) = lower.find("retry in ") {
        let tail = &lower[pos + "retry in ".len()..];
        if let Some(d) = parse_leading_duration(tail) {
            return Some(d);
        }
    }
    None
}

fn extract_after_prefix(lower: &str, prefix: &str) -> Option<u64> {
    let pos = lower.find(prefix)?;
    let tail = lower[pos + prefix.len()..].trim_start();
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse a leading `<number><unit>` token, where unit is one of
/// `ms`, `s`, `sec(s)`, `second(s)`, `m`, `min(s)`, `minute(s)`.
fn parse_leading_duration(tail: &str) -> Option<Duration> {
    let tail = tail.trim_start();
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    let rest = tail[digits.len()..].trim_start();

    if rest.starts_with("ms") {
        Some(Duration::from_millis(n))
    } else if rest.starts_with('m') {
        Some(Duration::from_secs(n * 60))
    } else if rest.starts_with('s') {
        Some(Duration::from_secs(n))
    } else {
        // A bare number with no recognizable unit: assume seconds, the
        // common case for "try again in 30".
        Some(Duration::from_secs(n))
    }
}
