// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-bus
//!
//! The file-tree state machine for every agent's inbox (spec §3, §4.3):
//! `new → seen → in_progress → processed`, plus delivery and mid-flight
//! update (spec §4.4). Every state directory for every roster agent plus
//! the distinguished role names is materialized on `ensure_bus_root`.
//!
//! Contention policy: writers never share a file path. Every write goes
//! through a randomized temp name in the destination directory followed by
//! a rename, so concurrent enumerators never observe a partially written
//! file.

/// Mid-flight packet updates (spec §4.4 `update`).
pub mod update;
/// Follow-up dispatch on behalf of a completing worker (spec §4.11).
pub mod followup;

pub use followup::{dispatch_follow_ups, DispatchOutcome, FollowUpError, FollowUpSpec};

pub use state::TaskState;

/// The four-state task lifecycle.
mod state {
    /// Which inbox directory a task currently lives in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TaskState {
        /// Delivered, not yet opened.
        New,
        /// Opened at least once, not yet claimed.
        Seen,
        /// Claimed by a worker attempt.
        InProgress,
        /// Closed with a receipt.
        Processed,
    }

    impl TaskState {
        /// Every state, in lifecycle order.
        pub const ALL: &'static [TaskState] =
            &[TaskState::New, TaskState::Seen, TaskState::InProgress, TaskState::Processed];

        /// The directory name this state maps to under `inbox/<agent>/`.
        #[must_use]
        pub fn dirname(self) -> &'static str {
            match self {
                Self::New => "new",
                Self::Seen => "seen",
                Self::InProgress => "in_progress",
                Self::Processed => "processed",
            }
        }
    }
}

use agentbus_codec::suspicious::{scan, SuspiciousHit, SuspiciousPolicy};
use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_core::{Packet, PacketHeader, Roster};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Root-relative filesystem layout for the bus (spec §3).
#[derive(Debug, Clone)]
pub struct BusStorage {
    root: PathBuf,
}

static SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

impl BusStorage {
    /// Create a handle rooted at `root`. Does not touch the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The bus root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inbox_dir(&self, agent: &str, state: TaskState) -> PathBuf {
        self.root.join("inbox").join(agent).join(state.dirname())
    }

    /// Idempotently materialize every state directory for every roster
    /// agent plus the distinguished role names (spec §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::BusRootUnavailable`] if a directory cannot
    /// be created.
    pub fn ensure_bus_root(&self, roster: &Roster) -> Result<(), BusError> {
        for agent in roster.agent_names() {
            for state in TaskState::ALL {
                let dir = self.inbox_dir(&agent, *state);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    BusError::new(
                        BusErrorCode::BusRootUnavailable,
                        format!("create {}: {e}", dir.display()),
                    )
                })?;
            }
            for sub in ["receipts", "artifacts", "state", "deadletter"] {
                let dir = self.root.join(sub).join(&agent);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    BusError::new(
                        BusErrorCode::BusRootUnavailable,
                        format!("create {}: {e}", dir.display()),
                    )
                })?;
            }
        }
        for sub in [
            "state/codex-global-semaphore",
            "state/worker-locks",
            "state/codex-task-sessions",
            "state/codex-root-sessions",
        ] {
            let dir = self.root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| {
                BusError::new(
                    BusErrorCode::BusRootUnavailable,
                    format!("create {}: {e}", dir.display()),
                )
            })?;
        }
        Ok(())
    }

    /// Locate the current state directory of `id` for `agent`. Accepts
    /// both `<id>.md` and `<id>__<suffix>.md` forms (spec §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::TaskNotFound`] if no matching file exists in
    /// any state directory.
    pub fn find_task_path(&self, agent: &str, id: &str) -> Result<(TaskState, PathBuf), BusError> {
        for state in TaskState::ALL {
            let dir = self.inbox_dir(agent, *state);
            if let Some(path) = find_matching_file(&dir, id) {
                return Ok((*state, path));
            }
        }
        Err(BusError::new(
            BusErrorCode::TaskNotFound,
            format!("no task '{id}' found for agent '{agent}'"),
        ))
    }

    /// Sorted enumeration of task ids in `state` for `agent`. Never raises
    /// if the directory is absent — an absent directory simply has no
    /// tasks.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than "not found".
    pub fn list_inbox_task_ids(&self, agent: &str, state: TaskState) -> Result<Vec<String>, BusError> {
        let dir = self.inbox_dir(agent, state);
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BusError::new(
                    BusErrorCode::BusRootUnavailable,
                    format!("read {}: {e}", dir.display()),
                ))
            }
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BusError::new(BusErrorCode::BusRootUnavailable, format!("read entry: {e}"))
            })?;
            if let Some(id) = task_id_from_filename(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Atomically move a task file from one state directory to another via
    /// rename.
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::TaskNotFound`] if `id` is not in `from`, and
    /// I/O errors for a failed rename.
    pub fn move_task(
        &self,
        agent: &str,
        id: &str,
        from: TaskState,
        to: TaskState,
    ) -> Result<PathBuf, BusError> {
        let from_dir = self.inbox_dir(agent, from);
        let src = find_matching_file(&from_dir, id).ok_or_else(|| {
            BusError::new(
                BusErrorCode::TaskNotFound,
                format!("'{id}' is not in state {from:?} for agent '{agent}'"),
            )
        })?;
        let to_dir = self.inbox_dir(agent, to);
        std::fs::create_dir_all(&to_dir).map_err(|e| {
            BusError::new(BusErrorCode::BusRootUnavailable, format!("create {}: {e}", to_dir.display()))
        })?;
        let filename = src.file_name().expect("file_name set by find_matching_file");
        let dest = to_dir.join(filename);
        std::fs::rename(&src, &dest)
            .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("rename: {e}")))?;
        tracing::info!(agent, id, from = ?from, to = ?to, "task moved");
        Ok(dest)
    }

    /// Read the packet at `id`, optionally promoting `new → seen`
    /// (spec §4.3 `openTask`).
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::TaskNotFound`] if `id` does not exist, or a
    /// codec error if the file cannot be parsed.
    pub fn open_task(&self, agent: &str, id: &str, mark_seen: bool) -> Result<(Packet, PathBuf), BusError> {
        let (state, path) = self.find_task_path(agent, id)?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| BusError::new(BusErrorCode::TaskNotFound, format!("read {}: {e}", path.display())))?;
        let packet = agentbus_codec::parse(&raw)?;
        let path = if mark_seen && state == TaskState::New {
            self.move_task(agent, id, TaskState::New, TaskState::Seen)?
        } else {
            path
        };
        Ok((packet, path))
    }

    /// Promote `new|seen → in_progress`. Fails if already `in_progress` or
    /// `processed` (spec §4.3 `claimTask`).
    ///
    /// # Errors
    ///
    /// Returns [`BusErrorCode::AlreadyClaimed`] or
    /// [`BusErrorCode::AlreadyProcessed`] accordingly.
    pub fn claim_task(&self, agent: &str, id: &str) -> Result<PathBuf, BusError> {
        let (state, _) = self.find_task_path(agent, id)?;
        match state {
            TaskState::New => self.move_task(agent, id, TaskState::New, TaskState::InProgress),
            TaskState::Seen => self.move_task(agent, id, TaskState::Seen, TaskState::InProgress),
            TaskState::InProgress => Err(BusError::new(
                BusErrorCode::AlreadyClaimed,
                format!("'{id}' is already in_progress for agent '{agent}'"),
            )),
            TaskState::Processed => Err(BusError::new(
                BusErrorCode::AlreadyProcessed,
                format!("'{id}' is already processed for agent '{agent}'"),
            )),
        }
    }

    /// Write `raw` to `<agent>/<state>/<id>.md` atomically (temp file in
    /// the destination directory, then rename). If a file for `id` already
    /// exists in that directory, appends a short hex suffix and retries a
    /// bounded number of times.
    pub(crate) fn write_new_file(
        &self,
        agent: &str,
        state: TaskState,
        id: &str,
        raw: &str,
    ) -> Result<PathBuf, BusError> {
        let dir = self.inbox_dir(agent, state);
        std::fs::create_dir_all(&dir)
            .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("create {}: {e}", dir.display())))?;

        const MAX_RETRIES: u32 = 8;
        let mut filename = format!("{id}.md");
        for attempt in 0..MAX_RETRIES {
            let dest = dir.join(&filename);
            if !dest.exists() {
                atomic_write(&dir, &dest, raw)?;
                return Ok(dest);
            }
            let suffix = collision_suffix(attempt);
            filename = format!("{id}__{suffix}.md");
        }
        Err(BusError::new(
            BusErrorCode::BusRootUnavailable,
            format!("could not allocate a unique filename for '{id}' after {MAX_RETRIES} attempts"),
        ))
    }
}

/// Rewrite an existing file in place: write to a temp name beside it, then
/// rename over the original. Used by [`update`] so a concurrent reader never
/// observes a half-written file.
pub(crate) fn atomic_rewrite(dest: &Path, contents: &str) -> Result<(), BusError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    atomic_write(dir, dest, contents)
}

fn atomic_write(dir: &Path, dest: &Path, contents: &str) -> Result<(), BusError> {
    let tmp_name = format!(".tmp-{}", collision_suffix(0));
    let tmp_path = dir.join(tmp_name);
    std::fs::write(&tmp_path, contents)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("write temp file: {e}")))?;
    std::fs::rename(&tmp_path, dest)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("rename into place: {e}")))?;
    Ok(())
}

fn collision_suffix(attempt: u32) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let counter = SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}", (nanos as u64) ^ counter ^ u64::from(std::process::id()) ^ u64::from(attempt))
}

fn task_id_from_filename(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".md")?;
    let id = stem.split("__").next().unwrap_or(stem);
    Some(id.to_string())
}

fn find_matching_file(dir: &Path, id: &str) -> Option<PathBuf> {
    let direct = dir.join(format!("{id}.md"));
    if direct.exists() {
        return Some(direct);
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let prefix = format!("{id}__");
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".md") {
            return Some(entry.path());
        }
    }
    None
}

/// Result of a successful [`deliver`] call.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// One path per recipient, in `to` order.
    pub paths: Vec<PathBuf>,
    /// Suspicious-content hits found, if the policy allowed delivery to proceed.
    pub suspicious_hits: Vec<SuspiciousHit>,
}

/// Validate, scan, and write a packet into every recipient's `new/`
/// directory (spec §4.4 `deliver`).
///
/// # Errors
///
/// Returns a structural [`BusError`] if the header is invalid, or
/// [`BusErrorCode::SuspiciousContentBlocked`] if the policy is `Block` and
/// a hit was found.
pub fn deliver(
    bus: &BusStorage,
    header: &PacketHeader,
    body: &str,
    known_agents: &[String],
    policy: SuspiciousPolicy,
) -> Result<DeliveryResult, BusError> {
    agentbus_codec::validate_header(header)?;
    agentbus_core::validate::validate_recipients_known(header, known_agents)?;

    let raw = agentbus_codec::render(header, body);
    let hits = scan(&raw);
    if !hits.is_empty() && policy == SuspiciousPolicy::Block {
        return Err(BusError::new(
            BusErrorCode::SuspiciousContentBlocked,
            format!("{} suspicious pattern(s) detected", hits.len()),
        ));
    }

    let mut paths = Vec::with_capacity(header.to.len());
    for recipient in &header.to {
        let path = bus.write_new_file(recipient, TaskState::New, &header.id, &raw)?;
        paths.push(path);
    }
    tracing::info!(id = %header.id, from = %header.from, to = ?header.to, "packet delivered");
    Ok(DeliveryResult {
        paths,
        suspicious_hits: if policy == SuspiciousPolicy::Allow { Vec::new() } else { hits },
    })
}
