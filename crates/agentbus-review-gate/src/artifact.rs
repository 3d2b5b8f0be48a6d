// SPDX-License-Identifier: MIT OR Apache-2.0
//! Renders the canonical review markdown artifact (spec §4.8): a single
//! file under `artifacts/<agent>/reviews/<id>.review.md` that carries the
//! four required sections (`findings`, `severity`, `file_refs`, `actions`)
//! in a stable, greppable order.

use crate::{ReviewEvidence, ReviewVerdict, REQUIRED_SECTIONS};
use std::fmt::Write as _;

/// One finding rendered into the artifact's `findings` section.
#[derive(Debug, Clone)]
pub struct ReviewFinding {
    /// Short title of the finding.
    pub summary: String,
    /// `"blocking"`, `"major"`, `"minor"`, or `"nit"`.
    pub severity: String,
    /// File paths the finding references, relative to the repo root.
    pub file_refs: Vec<String>,
    /// Suggested corrective action, if any.
    pub action: Option<String>,
}

/// Bus-root-relative path a review artifact for `agent`/`task_id` is
/// expected to live at: `artifacts/<agent>/reviews/<task_id>.review.md`.
#[must_use]
pub fn artifact_path(agent: &str, task_id: &str) -> String {
    format!("artifacts/{agent}/reviews/{task_id}.review.md")
}

/// Render the canonical review artifact markdown for a task.
///
/// `evidence` supplies the header-level facts (verdict, summary, commit
/// sha); `findings` supplies the per-finding detail rendered into the
/// `findings`/`severity`/`file_refs`/`actions` sections. The returned
/// string always contains all of [`REQUIRED_SECTIONS`], even when
/// `findings` is empty, so [`crate::evaluate`]'s `sectionsPresent` check
/// always has something truthful to point at.
#[must_use]
pub fn render_review_artifact(
    agent: &str,
    task_id: &str,
    evidence: &ReviewEvidence,
    findings: &[ReviewFinding],
) -> String {
    let mut out = String::new();

    let verdict_label = match evidence.verdict {
        ReviewVerdict::Pass => "pass",
        ReviewVerdict::ChangesRequested => "changes_requested",
    };
    let _ = writeln!(out, "# Review: {task_id}");
    let _ = writeln!(out);
    let _ = writeln!(out, "- agent: {agent}");
    let _ = writeln!(out, "- commit: {}", evidence.target_commit_sha);
    let _ = writeln!(out, "- verdict: {verdict_label}");
    let _ = writeln!(out, "- findings count: {}", evidence.findings_count);
    let _ = writeln!(out);
    let _ = writeln!(out, "## summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", evidence.summary.trim());
    let _ = writeln!(out);

    let _ = writeln!(out, "## findings");
    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "no findings.");
    } else {
        for (i, f) in findings.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, f.summary);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## severity");
    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "n/a");
    } else {
        for f in findings {
            let _ = writeln!(out, "- {}: {}", f.summary, f.severity);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## file_refs");
    let _ = writeln!(out);
    let mut any_refs = false;
    for f in findings {
        for path in &f.file_refs {
            any_refs = true;
            let _ = writeln!(out, "- {path}");
        }
    }
    if !any_refs {
        let _ = writeln!(out, "none");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## actions");
    let _ = writeln!(out);
    let mut any_actions = false;
    for f in findings {
        if let Some(action) = &f.action {
            any_actions = true;
            let _ = writeln!(out, "- {action}");
        }
    }
    if !any_actions {
        let _ = writeln!(out, "none required");
    }

    out
}

/// Which of [`REQUIRED_SECTIONS`] a rendered artifact body actually
/// contains, by looking for its `## <section>` heading. Used by callers
/// populating `evidence.sections_present` from a freshly rendered artifact.
#[must_use]
pub fn sections_present(rendered: &str) -> Vec<String> {
    REQUIRED_SECTIONS
        .iter()
        .filter(|section| rendered.contains(&format!("## {section}")))
        .map(|s| (*s).to_string())
        .collect()
}
