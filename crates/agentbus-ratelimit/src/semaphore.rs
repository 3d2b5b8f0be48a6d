//! The bounded N-slot process semaphore (spec §4.5).
//!
//! Each slot is a JSON file created with `O_EXCL` (`create_new`). A slot
//! held by a process that has died is detected by pid liveness (a null
//! signal via [`agentbus_lock::pid_is_alive`], the same probe the per-agent
//! worker lock uses) or by age past `stale_after`, and reclaimed by the
//! next acquirer.

use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_lock::pid_is_alive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotRecord {
    pid: u32,
    holder: String,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// A fixed-capacity, file-backed semaphore.
#[derive(Debug, Clone)]
pub struct Semaphore {
    dir: PathBuf,
    capacity: usize,
    stale_after: Duration,
}

impl Semaphore {
    /// Create a handle over `dir` (typically
    /// `<bus_root>/state/codex-global-semaphore`) with `capacity` slots. A
    /// slot older than `stale_after` is eligible for reclaim regardless of
    /// pid liveness, guarding against clock-skewed or non-Linux hosts where
    /// liveness cannot be checked.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, capacity: usize, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            capacity,
            stale_after,
        }
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("slot-{slot}.json"))
    }

    /// Attempt to claim any free slot for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::LockIoFailure`] if every slot is held by a
    /// live process, or for underlying I/O failures.
    pub fn acquire(&self, holder: &str) -> Result<SemaphoreGuard, BusError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            BusError::new(BusErrorCode::LockIoFailure, format!("create {}: {e}", self.dir.display()))
        })?;
        let token = new_token();
        for slot in 0..self.capacity {
            let path = self.slot_path(slot);
            if self.try_claim(&path, holder, &token)? {
                tracing::debug!(slot, holder, "semaphore slot acquired");
                return Ok(SemaphoreGuard { path, token });
            }
        }
        Err(BusError::new(
            BusErrorCode::LockIoFailure,
            format!("no free semaphore slot among {}", self.capacity),
        ))
    }

    fn try_claim(&self, path: &Path, holder: &str, token: &str) -> Result<bool, BusError> {
        if write_new_slot(path, holder, token)? {
            return Ok(true);
        }
        if self.reclaim_if_stale(path)? {
            return write_new_slot(path, holder, token);
        }
        Ok(false)
    }

    fn reclaim_if_stale(&self, path: &Path) -> Result<bool, BusError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(BusError::new(
                    BusErrorCode::LockIoFailure,
                    format!("read {}: {e}", path.display()),
                ))
            }
        };
        let record: SlotRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(_) => {
                let _ = std::fs::remove_file(path);
                return Ok(true);
            }
        };
        let age_exceeded = (Utc::now() - record.acquired_at)
            .to_std()
            .map(|age| age > self.stale_after)
            .unwrap_or(false);
        if age_exceeded || !pid_is_alive(record.pid) {
            let _ = std::fs::remove_file(path);
            tracing::warn!(pid = record.pid, holder = %record.holder, "reclaimed stale semaphore slot");
            return Ok(true);
        }
        Ok(false)
    }
}

fn write_new_slot(path: &Path, holder: &str, token: &str) -> Result<bool, BusError> {
    let record = SlotRecord {
        pid: std::process::id(),
        holder: holder.to_string(),
        token: token.to_string(),
        acquired_at: Utc::now(),
    };
    let contents = serde_json::to_string(&record)
        .map_err(|e| BusError::new(BusErrorCode::LockIoFailure, format!("serialize slot record: {e}")))?;
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut f) => {
            f.write_all(contents.as_bytes())
                .map_err(|e| BusError::new(BusErrorCode::LockIoFailure, format!("write slot file: {e}")))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(BusError::new(
            BusErrorCode::LockIoFailure,
            format!("create {}: {e}", path.display()),
        )),
    }
}

fn new_token() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}-{:x}", std::process::id(), nanos)
}

/// A held semaphore slot. Release explicitly with [`SemaphoreGuard::release`];
/// dropping without releasing also frees the slot on a best-effort basis,
/// guarded by the same token check.
#[derive(Debug)]
pub struct SemaphoreGuard {
    path: PathBuf,
    token: String,
}

impl SemaphoreGuard {
    fn owns_current_slot_file(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<SlotRecord>(&raw)
                .map(|record| record.token == self.token)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Release the slot, but only if it still holds our token. If another
    /// process already reclaimed it as stale, this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::LockIoFailure`] on an unexpected I/O failure.
    pub fn release(self) -> Result<(), BusError> {
        if self.owns_current_slot_file() {
            std::fs::remove_file(&self.path).map_err(|e| {
                BusError::new(BusErrorCode::LockIoFailure, format!("remove {}: {e}", self.path.display()))
            })?;
        }
        Ok(())
    }
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        if self.owns_current_slot_file() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
