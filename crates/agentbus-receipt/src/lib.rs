// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-receipt
//!
//! The idempotent, write-once receipt store (spec §4.10, "C10"):
//! `receipts/<agent>/<id>.json`, created with `O_EXCL` so a second closure
//! attempt for the same `(agent, id)` is a no-op that returns the existing
//! path rather than erroring or overwriting — the idempotence law "close;
//! close == close" from spec §8.
//!
//! Also maintains the per-agent receipt hash chain (SPEC_FULL §B) alongside
//! the receipts it stores, using [`agentbus_core::chain`] and
//! [`agentbus_core::verify`] for the hashing and verification itself — this
//! crate only owns where the chain lives on disk and when it grows.

use agentbus_core::chain::{self, ChainLink};
use agentbus_core::verify::{self, ChainVerification};
use agentbus_core::Receipt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Errors raised while reading or writing the receipt store.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptStoreError {
    /// An I/O failure reading or writing a receipt or chain file.
    #[error("receipt store I/O error at '{path}': {source}")]
    Io {
        /// Path involved in the failure.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A stored receipt or chain file is not valid JSON for its type.
    #[error("failed to parse '{path}': {source}")]
    Parse {
        /// Path involved in the failure.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> ReceiptStoreError {
    ReceiptStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> ReceiptStoreError {
    ReceiptStoreError::Parse {
        path: path.display().to_string(),
        source,
    }
}

/// Outcome of a [`ReceiptStore::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This call created the receipt file for the first time.
    Created,
    /// A receipt for this `(agent, task_id)` already existed; the write was
    /// a no-op.
    AlreadyExisted,
}

/// A handle over `<bus_root>/receipts/`.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    root: PathBuf,
}

impl ReceiptStore {
    /// Create a handle rooted at `bus_root/receipts`.
    pub fn new(bus_root: impl Into<PathBuf>) -> Self {
        Self {
            root: bus_root.into().join("receipts"),
        }
    }

    fn agent_dir(&self, agent: &str) -> PathBuf {
        self.root.join(agent)
    }

    fn receipt_path(&self, agent: &str, task_id: &str) -> PathBuf {
        self.agent_dir(agent).join(format!("{task_id}.json"))
    }

    fn chain_path(&self, agent: &str) -> PathBuf {
        self.agent_dir(agent).join(".chain.json")
    }

    /// Write `receipt` with `O_EXCL` semantics: the first call for a given
    /// `(agent, task_id)` creates the file and appends a chain link; every
    /// subsequent call is a no-op that reports
    /// [`WriteOutcome::AlreadyExisted`] and leaves the stored receipt and
    /// chain untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptStoreError`] on I/O or serialization failure.
    pub fn write(&self, receipt: &Receipt) -> Result<(PathBuf, WriteOutcome), ReceiptStoreError> {
        let dir = self.agent_dir(&receipt.agent);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = self.receipt_path(&receipt.agent, &receipt.task_id);

        let contents = serde_json::to_string_pretty(receipt).map_err(|e| parse_err(&path, e))?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(contents.as_bytes())
                    .map_err(|e| io_err(&path, e))?;
                self.append_chain_link(&receipt.agent, receipt)?;
                tracing::info!(agent = %receipt.agent, task_id = %receipt.task_id, "receipt written");
                Ok((path, WriteOutcome::Created))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok((path, WriteOutcome::AlreadyExisted))
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn append_chain_link(&self, agent: &str, receipt: &Receipt) -> Result<(), ReceiptStoreError> {
        let chain_path = self.chain_path(agent);
        let mut links = self.read_chain(agent)?;
        let link = chain::append(links.last(), receipt);
        links.push(link);
        let contents =
            serde_json::to_string_pretty(&links).map_err(|e| parse_err(&chain_path, e))?;
        std::fs::write(&chain_path, contents).map_err(|e| io_err(&chain_path, e))
    }

    fn read_chain(&self, agent: &str) -> Result<Vec<ChainLink>, ReceiptStoreError> {
        let chain_path = self.chain_path(agent);
        match std::fs::read_to_string(&chain_path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| parse_err(&chain_path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_err(&chain_path, e)),
        }
    }

    /// Read the stored receipt for `(agent, task_id)`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptStoreError`] on I/O or parse failure.
    pub fn read(&self, agent: &str, task_id: &str) -> Result<Option<Receipt>, ReceiptStoreError> {
        let path = self.receipt_path(agent, task_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| parse_err(&path, e))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// List up to `limit` receipts for `agent` (or every agent if `None`),
    /// most recently closed first. Backs the CLI's `recent` command.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptStoreError`] on I/O or parse failure.
    pub fn list_recent(
        &self,
        agent: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Receipt>, ReceiptStoreError> {
        let mut receipts = Vec::new();
        let agent_dirs: Vec<PathBuf> = match agent {
            Some(a) => vec![self.agent_dir(a)],
            None => {
                let Ok(entries) = std::fs::read_dir(&self.root) else {
                    return Ok(Vec::new());
                };
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect()
            }
        };

        for dir in agent_dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.ends_with(".json") || name.starts_with('.') {
                    continue;
                }
                let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
                let receipt: Receipt =
                    serde_json::from_str(&raw).map_err(|e| parse_err(&path, e))?;
                receipts.push(receipt);
            }
        }

        receipts.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        receipts.truncate(limit);
        Ok(receipts)
    }

    /// Verify `agent`'s stored receipt chain against one rebuilt fresh from
    /// the receipts currently on disk, in stored chain order.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptStoreError`] on I/O or parse failure.
    pub fn verify_chain(&self, agent: &str) -> Result<ChainVerification, ReceiptStoreError> {
        let stored = self.read_chain(agent)?;
        let mut receipts = Vec::with_capacity(stored.len());
        for link in &stored {
            if let Some(receipt) = self.read(agent, &link.task_id)? {
                receipts.push(receipt);
            }
        }
        Ok(verify::verify_chain(&receipts, &stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_core::{Outcome, PacketHeaderSnapshot};
    use std::collections::BTreeMap;

    fn receipt(agent: &str, task_id: &str, outcome: Outcome) -> Receipt {
        Receipt {
            agent: agent.into(),
            task_id: task_id.into(),
            outcome,
            note: None,
            commit_sha: None,
            closed_at: chrono::Utc::now(),
            packet_snapshot: PacketHeaderSnapshot {
                id: task_id.into(),
                to: vec![agent.into()],
                from: "autopilot".into(),
                priority: "P1".into(),
                title: "t".into(),
                root_id: task_id.into(),
                parent_id: task_id.into(),
                kind: None,
                phase: None,
            },
            receipt_extra: BTreeMap::new(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        let r = receipt("backend", "T1", Outcome::Done);
        let (_, outcome) = store.write(&r).unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        let back = store.read("backend", "T1").unwrap().unwrap();
        assert_eq!(back.task_id, "T1");
    }

    #[test]
    fn second_write_for_same_id_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        let r1 = receipt("backend", "T1", Outcome::Done);
        let mut r2 = r1.clone();
        r2.outcome = Outcome::Failed; // a conflicting second close attempt
        store.write(&r1).unwrap();
        let (_, outcome) = store.write(&r2).unwrap();
        assert_eq!(outcome, WriteOutcome::AlreadyExisted);
        let stored = store.read("backend", "T1").unwrap().unwrap();
        assert_eq!(
            stored.outcome,
            Outcome::Done,
            "first receipt must not be overwritten"
        );
    }

    #[test]
    fn list_recent_sorts_newest_first_and_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        let mut older = receipt("backend", "T1", Outcome::Done);
        older.closed_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let newer = receipt("backend", "T2", Outcome::Done);
        store.write(&older).unwrap();
        store.write(&newer).unwrap();

        let recent = store.list_recent(Some("backend"), 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].task_id, "T2");
    }

    #[test]
    fn chain_verifies_after_several_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        store
            .write(&receipt("backend", "T1", Outcome::Done))
            .unwrap();
        store
            .write(&receipt("backend", "T2", Outcome::Done))
            .unwrap();
        let verification = store.verify_chain("backend").unwrap();
        assert!(verification.is_valid);
        assert_eq!(verification.valid_count, 2);
    }

    #[test]
    fn chain_detects_hand_edited_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path());
        store
            .write(&receipt("backend", "T1", Outcome::Done))
            .unwrap();
        // Tamper directly on disk, bypassing the store's write path.
        let path = dir.path().join("receipts/backend/T1.json");
        let mut tampered = receipt("backend", "T1", Outcome::Failed);
        tampered.note = Some("tampered".into());
        std::fs::write(&path, serde_json::to_string_pretty(&tampered).unwrap()).unwrap();

        let verification = store.verify_chain("backend").unwrap();
        assert!(!verification.is_valid);
    }
}
