//! The global cooldown barrier (spec §4.5).
//!
//! A single JSON file records the timestamp before which no worker should
//! start a new engine attempt. `extend` merges monotonically: the stored
//! value only ever moves forward.

use agentbus_core::error::{BusError, BusErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CooldownFile {
    until: DateTime<Utc>,
}

/// A handle to the cooldown marker file at a fixed path.
#[derive(Debug, Clone)]
pub struct Cooldown {
    path: PathBuf,
}

impl Cooldown {
    /// Create a handle rooted at `path` (typically
    /// `<bus_root>/state/global-cooldown.json`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the currently stored `until` timestamp, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the file exists but cannot be read or parsed.
    pub fn read(&self) -> Result<Option<DateTime<Utc>>, BusError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let file: CooldownFile = serde_json::from_str(&raw).map_err(|e| {
                    BusError::new(BusErrorCode::BusRootUnavailable, format!("parse cooldown file: {e}"))
                })?;
                Ok(Some(file.until))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BusError::new(
                BusErrorCode::BusRootUnavailable,
                format!("read {}: {e}", self.path.display()),
            )),
        }
    }

    /// Remaining wait time before `now` clears the cooldown. Zero if the
    /// cooldown is unset or already in the past.
    ///
    /// # Errors
    ///
    /// Propagates [`Cooldown::read`] errors.
    pub fn remaining(&self, now: DateTime<Utc>) -> Result<Duration, BusError> {
        let until = self.read()?;
        Ok(until
            .and_then(|u| (u - now).to_std().ok())
            .unwrap_or(Duration::ZERO))
    }

    /// Extend the cooldown to `candidate`, but never move it earlier than
    /// whatever is currently stored. Returns the resulting (merged) value.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the file cannot be written.
    pub fn extend(&self, candidate: DateTime<Utc>) -> Result<DateTime<Utc>, BusError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BusError::new(BusErrorCode::BusRootUnavailable, format!("create {}: {e}", parent.display()))
            })?;
        }
        let current = self.read()?;
        let merged = match current {
            Some(existing) if existing >= candidate => existing,
            _ => candidate,
        };
        write_atomic(&self.path, &CooldownFile { until: merged })?;
        if Some(merged) != current {
            tracing::info!(until = %merged, "global cooldown extended");
        }
        Ok(merged)
    }
}

fn write_atomic(path: &Path, file: &CooldownFile) -> Result<(), BusError> {
    let contents = serde_json::to_string(file)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("serialize cooldown: {e}")))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".tmp-cooldown-{}", std::process::id()));
    std::fs::write(&tmp, contents)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("write temp cooldown: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| BusError::new(BusErrorCode::BusRootUnavailable, format!("rename cooldown into place: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/global-cooldown.json");
        (dir, path)
    }

    #[test]
    fn read_returns_none_when_unset() {
        let (_dir, path) = path();
        let cooldown = Cooldown::new(path);
        assert!(cooldown.read().unwrap().is_none());
    }

    #[test]
    fn extend_sets_the_value_the_first_time() {
        let (_dir, path) = path();
        let cooldown = Cooldown::new(path);
        let now = Utc::now();
        let until = now + ChronoDuration::seconds(30);
        let merged = cooldown.extend(until).unwrap();
        assert_eq!(merged, until);
    }

    #[test]
    fn extend_never_moves_the_deadline_earlier() {
        let (_dir, path) = path();
        let cooldown = Cooldown::new(path);
        let now = Utc::now();
        let far = now + ChronoDuration::seconds(60);
        let near = now + ChronoDuration::seconds(10);
        cooldown.extend(far).unwrap();
        let merged = cooldown.extend(near).unwrap();
        assert_eq!(merged, far);
    }

    #[test]
    fn extend_does_move_the_deadline_later() {
        let (_dir, path) = path();
        let cooldown = Cooldown::new(path);
        let now = Utc::now();
        let near = now + ChronoDuration::seconds(10);
        let far = now + ChronoDuration::seconds(60);
        cooldown.extend(near).unwrap();
        let merged = cooldown.extend(far).unwrap();
        assert_eq!(merged, far);
    }

    #[test]
    fn remaining_is_zero_once_the_deadline_passes() {
        let (_dir, path) = path();
        let cooldown = Cooldown::new(path);
        let past = Utc::now() - ChronoDuration::seconds(5);
        cooldown.extend(past).unwrap();
        let remaining = cooldown.remaining(Utc::now()).unwrap();
        assert_eq!(remaining, Duration::ZERO);
    }
}
