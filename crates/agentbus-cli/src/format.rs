// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting for the `agentbus` CLI (spec §6: `--format json|lines`).

use agentbus_core::Receipt;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The two output shapes spec §6 names for `recent`/`open-tasks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    Json,
    /// One human-readable line per record.
    Lines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Lines => "lines",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "lines" => Ok(Self::Lines),
            other => Err(format!("unknown output format '{other}' (expected json|lines)")),
        }
    }
}

/// Render a list of receipts for `recent` per the requested format.
#[must_use]
pub fn format_receipts(receipts: &[Receipt], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(receipts).unwrap_or_default(),
        OutputFormat::Lines => receipts.iter().map(receipt_line).collect::<Vec<_>>().join("\n"),
    }
}

fn receipt_line(r: &Receipt) -> String {
    format!(
        "{}\t{}\t{}\t{}{}",
        r.closed_at.to_rfc3339(),
        r.agent,
        r.task_id,
        serde_json::to_value(r.outcome).map(|v| v.to_string()).unwrap_or_default(),
        r.commit_sha.as_deref().map(|c| format!("\t{c}")).unwrap_or_default(),
    )
}

/// One row of the `open-tasks` listing.
#[derive(Debug, Clone, Serialize)]
pub struct OpenTaskRow {
    /// Agent the task is addressed to.
    pub agent: String,
    /// Task id.
    pub id: String,
    /// Current inbox state (`new`, `seen`, `in_progress`).
    pub state: String,
    /// Workflow root id.
    pub root_id: String,
    /// One-line title.
    pub title: String,
    /// Priority label.
    pub priority: String,
}

/// Render the `open-tasks` listing per the requested format.
#[must_use]
pub fn format_open_tasks(rows: &[OpenTaskRow], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(rows).unwrap_or_default(),
        OutputFormat::Lines => rows
            .iter()
            .map(|r| format!("{}\t{}\t{}\t{}\t{}\t{}", r.agent, r.id, r.state, r.root_id, r.priority, r.title))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// One row of the `status` listing: per-agent counts across the four inbox
/// states (spec §6 `status`).
#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    /// Agent name.
    pub agent: String,
    /// Count of packets in `new/`.
    pub new: usize,
    /// Count of packets in `seen/`.
    pub seen: usize,
    /// Count of packets in `in_progress/`.
    pub in_progress: usize,
    /// Count of packets in `processed/`.
    pub processed: usize,
}

/// Render the `status` listing per the requested format.
#[must_use]
pub fn format_status(rows: &[StatusRow], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(rows).unwrap_or_default(),
        OutputFormat::Lines => rows
            .iter()
            .map(|r| format!("{}\tnew={}\tseen={}\tin_progress={}\tprocessed={}", r.agent, r.new, r.seen, r.in_progress, r.processed))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
