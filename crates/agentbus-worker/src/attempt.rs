// SPDX-License-Identifier: MIT OR Apache-2.0
//! The three-way engine race (spec §4.7 step h): the engine either finishes,
//! gets superseded by a packet update landing mid-flight, or blows the
//! watchdog timeout. All three paths funnel through the same SIGTERM, then
//! grace period, then SIGKILL termination escalation before the caller
//! retries or closes the task.

use crate::engine::{EngineHandle, EngineLauncher, EngineSpec};
use agentbus_retry::{classify_failure, parse_retry_after_hint, FailureClass};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// How one engine attempt was resolved.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The engine exited zero and left a well-formed artifact behind.
    Completed(serde_json::Value),
    /// The engine exited, but no usable artifact was produced; classified
    /// from its combined stdout/stderr.
    EngineFailed {
        /// What kind of failure the output looks like.
        class: FailureClass,
        /// A `Retry-After`-style hint parsed from the output, if any.
        retry_after_hint: Option<Duration>,
        /// Combined stdout/stderr, for diagnostics and receipt extras.
        combined_output: String,
    },
    /// The task packet's mtime advanced while the engine was running
    /// (spec: an `update` landed mid-attempt). The caller should restart
    /// against the fresh packet rather than trust this attempt's output.
    Superseded,
    /// The watchdog timeout elapsed before the engine finished.
    TimedOut,
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run one engine attempt to completion, racing it against a packet-mtime
/// watcher and a hard watchdog timeout.
///
/// `artifact_path` is where the engine is expected to write its structured
/// JSON result; `watch_path` is the task packet file whose mtime is polled
/// for supersession; `baseline_mtime` is the packet's mtime as observed
/// just before spawning (spec §4.7 step f).
pub async fn run_attempt(
    launcher: &dyn EngineLauncher,
    spec: &EngineSpec,
    artifact_path: &Path,
    watch_path: &Path,
    baseline_mtime: SystemTime,
    watchdog_timeout: Duration,
    watchdog_grace: Duration,
) -> Result<AttemptOutcome, agentbus_core::error::BusError> {
    let mut handle = launcher.spawn(spec).await?;
    let deadline = tokio::time::Instant::now() + watchdog_timeout;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Some(status) = handle.try_wait().map_err(io_err)? {
            // Give the stdout/stderr forwarding tasks a beat to drain the
            // pipes before reading back the combined output.
            tokio::time::sleep(Duration::from_millis(50)).await;
            return Ok(resolve_exit(status.success(), artifact_path, &handle.combined_output()));
        }

        if mtime_advanced(watch_path, baseline_mtime) {
            tracing::info!(path = %watch_path.display(), "packet updated mid-attempt, superseding");
            terminate_with_escalation(handle.as_mut(), watchdog_grace).await;
            return Ok(AttemptOutcome::Superseded);
        }

        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(timeout_secs = watchdog_timeout.as_secs(), "engine watchdog timeout");
            terminate_with_escalation(handle.as_mut(), watchdog_grace).await;
            return Ok(AttemptOutcome::TimedOut);
        }
    }
}

fn io_err(e: std::io::Error) -> agentbus_core::error::BusError {
    agentbus_core::error::BusError::new(
        agentbus_core::error::BusErrorCode::LockIoFailure,
        format!("engine process I/O: {e}"),
    )
}

fn resolve_exit(success: bool, artifact_path: &Path, combined_output: &str) -> AttemptOutcome {
    if success {
        if let Ok(raw) = std::fs::read_to_string(artifact_path) {
            if let Ok(value) = serde_json::from_str(&raw) {
                return AttemptOutcome::Completed(value);
            }
        }
    }
    let class = classify_failure(combined_output);
    AttemptOutcome::EngineFailed {
        class,
        retry_after_hint: parse_retry_after_hint(combined_output),
        combined_output: combined_output.to_string(),
    }
}

fn mtime_advanced(path: &Path, baseline: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| mtime > baseline)
        .unwrap_or(false)
}

/// SIGTERM, wait up to `grace`, then SIGKILL if it hasn't exited.
async fn terminate_with_escalation(handle: &mut dyn EngineHandle, grace: Duration) {
    send_sigterm(handle.pid());
    if tokio::time::timeout(grace, handle.wait()).await.is_err() {
        tracing::warn!(pid = handle.pid(), "engine did not exit within grace period, sending SIGKILL");
        let _ = handle.kill().await;
    }
}

/// Send `SIGTERM` to `pid`. Best-effort: a process that has already exited
/// (ESRCH) is not an error from our perspective.
#[allow(unsafe_code)]
fn send_sigterm(pid: u32) {
    // SAFETY: `kill` with a real signal has no aliasing or lifetime concerns
    // beyond the syscall itself; an already-dead pid simply yields ESRCH,
    // which we intentionally ignore.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}
