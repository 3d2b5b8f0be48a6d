// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-lock
//!
//! The per-agent exclusive-writer lock (spec §4.6, "C6"): one file per
//! agent, created with `O_EXCL`, containing `{pid, acquired_at, token}`.
//!
//! `O_EXCL` create is the atomicity primitive; two processes racing to
//! create the same path can never both succeed. Liveness of the recorded
//! pid replaces OS advisory locks, which do not reliably survive arbitrary
//! process deaths across every platform this runs on. The liveness probe
//! must distinguish "no such process" (stale, safe to steal) from
//! "permission denied" (some other live process we can't signal, but is
//! alive) — a bare `kill(pid, 0)` via libc gives us exactly that via errno.

use agentbus_core::error::{BusError, BusErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// Why [`acquire`] did not return a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock is held by a pid that answered alive to the liveness probe.
    /// Per spec §4.6 the caller should exit cleanly as a duplicate worker.
    HeldByLiveProcess,
}

/// A held per-agent lock. Release with [`WorkerLock::release`]; dropping
/// without releasing leaves the file in place (a later process will steal
/// it once this pid dies, via [`acquire`]'s stale-lock recovery).
#[derive(Debug)]
pub struct WorkerLock {
    path: PathBuf,
    token: String,
}

impl WorkerLock {
    /// The path backing this lock.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn owns_current_lock_file(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<LockRecord>(&raw)
                .map(|record| record.token == self.token)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Release the lock, guarded by token match: if another process already
    /// reclaimed this lock as stale and wrote its own record, this is a
    /// no-op rather than deleting someone else's live lock.
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::LockIoFailure`] on an unexpected I/O failure.
    pub fn release(self) -> Result<(), BusError> {
        if self.owns_current_lock_file() {
            std::fs::remove_file(&self.path).map_err(|e| {
                BusError::new(BusErrorCode::LockIoFailure, format!("remove {}: {e}", self.path.display()))
            })?;
            tracing::info!(path = %self.path.display(), "worker lock released");
        }
        Ok(())
    }
}

/// Attempt to acquire the per-agent lock file at `path`.
///
/// Bounded retry: on each pass, if `O_EXCL` creation fails because the file
/// already exists, the existing record is read. If its pid is alive, the
/// caller gets [`AcquireOutcome::HeldByLiveProcess`] (spec: "the new worker
/// exits cleanly (duplicate)"). If the pid is dead, the stale file is
/// removed and the loop retries — bounded by `max_attempts` so a pathological
/// race (two processes simultaneously stealing a dead lock) cannot spin
/// forever.
///
/// # Errors
///
/// Returns [`BusErrorCode::LockIoFailure`] for I/O failures other than the
/// expected `AlreadyExists` race, or if `max_attempts` is exhausted.
pub fn acquire(
    path: impl Into<PathBuf>,
    max_attempts: u32,
) -> Result<Result<WorkerLock, AcquireOutcome>, BusError> {
    let path = path.into();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            BusError::new(BusErrorCode::LockIoFailure, format!("create {}: {e}", parent.display()))
        })?;
    }

    for _ in 0..max_attempts.max(1) {
        let token = new_token();
        if try_create(&path, &token)? {
            tracing::info!(path = %path.display(), "worker lock acquired");
            return Ok(Ok(WorkerLock { path, token }));
        }

        let existing = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            // Someone released between our failed create and this read; retry.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(BusError::new(
                    BusErrorCode::LockIoFailure,
                    format!("read {}: {e}", path.display()),
                ))
            }
        };

        let record: LockRecord = match serde_json::from_str(&existing) {
            Ok(r) => r,
            // Unparsable lock file: treat as corrupt/stale and reclaim.
            Err(_) => {
                let _ = std::fs::remove_file(&path);
                continue;
            }
        };

        if pid_is_alive(record.pid) {
            return Ok(Err(AcquireOutcome::HeldByLiveProcess));
        }

        tracing::warn!(pid = record.pid, path = %path.display(), "reclaiming stale worker lock");
        let _ = std::fs::remove_file(&path);
    }

    Err(BusError::new(
        BusErrorCode::LockIoFailure,
        format!("could not acquire lock at {} after {max_attempts} attempts", path.display()),
    ))
}

fn try_create(path: &Path, token: &str) -> Result<bool, BusError> {
    let record = LockRecord {
        pid: std::process::id(),
        token: token.to_string(),
        acquired_at: Utc::now(),
    };
    let contents = serde_json::to_string(&record)
        .map_err(|e| BusError::new(BusErrorCode::LockIoFailure, format!("serialize lock record: {e}")))?;
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut f) => {
            f.write_all(contents.as_bytes())
                .map_err(|e| BusError::new(BusErrorCode::LockIoFailure, format!("write lock file: {e}")))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(BusError::new(BusErrorCode::LockIoFailure, format!("create {}: {e}", path.display()))),
    }
}

/// Send a null signal to `pid` and interpret the result per `kill(2)`:
/// success or `EPERM` means a process with that pid exists (alive, even if
/// we can't signal it); `ESRCH` means it does not.
#[must_use]
#[allow(unsafe_code)]
pub fn pid_is_alive(pid: u32) -> bool {
    // SAFETY: `kill` with signal 0 performs no action beyond existence/permission
    // checking; passing a plain integer pid has no aliasing or lifetime concerns.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(0);
    errno == libc::EPERM
}

fn new_token() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}-{:x}", std::process::id(), nanos)
}
