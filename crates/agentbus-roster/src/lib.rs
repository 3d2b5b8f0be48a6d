// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-roster
//!
//! Loads the static catalog of agent identities (spec §4.2) and expands
//! `$NAME`-style placeholders in workdir templates against a fixed
//! dictionary of environment values.

use agentbus_core::{Roster, RosterAgent};
use std::collections::BTreeMap;
use std::path::Path;

/// A bundled fallback roster used when the caller does not explicitly pin
/// a path and no roster file exists yet. Mirrors a minimal single-repo
/// setup: one frontend/backend/qa/infra worker plus the three
/// distinguished roles.
const BUNDLED_FALLBACK: &str = include_str!("bundled_roster.json");

/// Errors raised while loading or validating a roster.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    /// The file could not be read.
    #[error("failed to read roster file '{path}': {source}")]
    Io {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON or does not match the roster shape.
    #[error("failed to parse roster: {0}")]
    Parse(#[from] serde_json::Error),
    /// The roster has no agents, or an agent has an empty name (spec §4.2
    /// invariant: a non-empty `agents` list with a `name` field per entry
    /// is mandatory).
    #[error("roster is invalid: {0}")]
    Invalid(String),
}

/// Load a roster from `path`.
///
/// If `path` is `None`, the caller did not explicitly pin a path: first try
/// the conventional `./agentbus-roster.json`, falling back to the bundled
/// single-repo roster if that file does not exist.
///
/// # Errors
///
/// Returns [`RosterError`] if the file is unreadable, unparsable, or
/// structurally invalid (spec §4.2).
pub fn load(path: Option<&Path>) -> Result<Roster, RosterError> {
    let raw = match path {
        Some(p) => read_file(p)?,
        None => {
            let conventional = Path::new("agentbus-roster.json");
            if conventional.exists() {
                read_file(conventional)?
            } else {
                BUNDLED_FALLBACK.to_string()
            }
        }
    };
    let roster: Roster = serde_json::from_str(&raw)?;
    validate(&roster)?;
    Ok(roster)
}

fn read_file(path: &Path) -> Result<String, RosterError> {
    std::fs::read_to_string(path).map_err(|source| RosterError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn validate(roster: &Roster) -> Result<(), RosterError> {
    if roster.agents.is_empty() {
        return Err(RosterError::Invalid("roster has no agents".into()));
    }
    for agent in &roster.agents {
        if agent.name.trim().is_empty() {
            return Err(RosterError::Invalid("an agent entry has an empty name".into()));
        }
    }
    Ok(())
}

/// Expand `$NAME`-style placeholders in a workdir template.
///
/// Purely textual substitution (spec §4.2) — no shell evaluation, no glob
/// expansion, no recursive substitution of the substituted value.
#[must_use]
pub fn expand_workdir(template: &str, dict: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let rest = &template[i + 1..];
        let name_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(rest.len(), |(idx, _)| idx);
        if name_len == 0 {
            out.push('$');
            continue;
        }
        let name = &rest[..name_len];
        if let Some(value) = dict.get(name) {
            out.push_str(value);
        } else {
            // Unknown placeholder: keep it verbatim so the caller can see
            // which key was missing rather than silently dropping it.
            out.push('$');
            out.push_str(name);
        }
        for _ in 0..name_len {
            chars.next();
        }
    }
    out
}

/// The fixed dictionary of workdir placeholders (spec §4.2):
/// `$REPO_ROOT`, `$WORKTREES_DIR`, `$HOME`.
#[must_use]
pub fn placeholder_dict(repo_root: &str, worktrees_dir: &str, home: &str) -> BTreeMap<String, String> {
    let mut dict = BTreeMap::new();
    dict.insert("REPO_ROOT".to_string(), repo_root.to_string());
    dict.insert("WORKTREES_DIR".to_string(), worktrees_dir.to_string());
    dict.insert("HOME".to_string(), home.to_string());
    dict
}

/// Look up an agent's expanded workdir, or `None` if it has no template.
#[must_use]
pub fn agent_workdir(agent: &RosterAgent, dict: &BTreeMap<String, String>) -> Option<String> {
    agent.workdir.as_deref().map(|t| expand_workdir(t, dict))
}
