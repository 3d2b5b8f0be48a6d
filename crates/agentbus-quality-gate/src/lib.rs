// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-quality-gate
//!
//! The code-quality gate (spec §4.9, "C9"): eight deterministic checks run
//! against a task's working-tree diff before a worker may close a code-
//! change task. Produces a machine-readable [`QualityGateReport`] plus a
//! markdown rendering, both written under `.codex/quality/logs/` inside the
//! repo root.

mod checks;
mod diff;

pub use checks::{CheckResult, QualityGateConfig, Severity};
pub use diff::{ChangeSet, DiffError, FileDiff};

use agentbus_core::error::BusErrorCode;
use agentbus_glob::IncludeExcludeGlobs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Aggregate result of running the quality gate (spec §4.9: `{ ok, checks[],
/// hardRules, errors[], warnings[] }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateReport {
    /// `false` if any blocking check failed.
    pub ok: bool,
    /// Every check that ran, in a fixed order.
    pub checks: Vec<CheckResult>,
    /// Names of the blocking checks that failed.
    pub hard_rules: Vec<String>,
    /// Flattened messages from failed blocking checks.
    pub errors: Vec<String>,
    /// Flattened messages from failed advisory checks.
    pub warnings: Vec<String>,
}

/// Run the full quality gate against `repo_path`'s working tree, diffed
/// against `base_ref` (default `HEAD` when `None`).
///
/// # Errors
///
/// Returns [`DiffError`] if the underlying `git` invocations fail.
pub fn run_quality_gate(
    repo_path: &Path,
    base_ref: Option<&str>,
    scope: Option<&IncludeExcludeGlobs>,
    config: &QualityGateConfig,
) -> Result<QualityGateReport, DiffError> {
    let mut changes = diff::collect_change_set(repo_path, base_ref)?;
    if let Some(scope) = scope {
        changes = changes.scoped(scope);
    }
    let effective_base = base_ref.unwrap_or("HEAD");

    let mut result = vec![
        checks::no_merge_conflict_markers(repo_path, &changes),
        checks::no_quality_escapes(repo_path, &changes),
        checks::legacy_quality_debt_advisory(repo_path, effective_base, &changes),
        checks::no_temp_artifacts(&changes, config),
        checks::runtime_script_change_has_tests(&changes, config),
        checks::diff_volume_balanced(repo_path, &changes, config),
        checks::no_duplicate_added_blocks(&changes),
    ];
    if let Some(skill_check) = checks::skill_file_validators(repo_path, &changes, config) {
        result.push(skill_check);
    }

    Ok(summarize(result))
}

/// The stable error code a worker should attach when closing a task as
/// `needs_review` because [`QualityGateReport::ok`] was `false` (spec §7,
/// `AB-G002`).
#[must_use]
pub fn failure_code(report: &QualityGateReport) -> Option<BusErrorCode> {
    if report.ok {
        None
    } else {
        Some(BusErrorCode::QualityGateFailure)
    }
}

fn summarize(checks: Vec<CheckResult>) -> QualityGateReport {
    let mut hard_rules = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut ok = true;

    for check in &checks {
        if check.passed {
            continue;
        }
        match check.severity {
            Severity::Blocking => {
                ok = false;
                hard_rules.push(check.name.clone());
                errors.extend(check.messages.iter().cloned());
            }
            Severity::Advisory => {
                warnings.extend(check.messages.iter().cloned());
            }
        }
    }

    QualityGateReport {
        ok,
        checks,
        hard_rules,
        errors,
        warnings,
    }
}

/// Repo-relative directory the report artifacts are written under.
pub const QUALITY_LOG_DIR: &str = ".codex/quality/logs";

/// Where [`write_report`] places the markdown and JSON artifacts for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReportPaths {
    /// Repo-relative path to the rendered markdown report.
    pub markdown_path: PathBuf,
    /// Repo-relative path to the JSON summary.
    pub json_path: PathBuf,
}

/// Render and write both artifacts for `task_id` under
/// `<repo_path>/.codex/quality/logs/`, creating the directory if needed.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or either file
/// cannot be written.
pub fn write_report(
    repo_path: &Path,
    task_id: &str,
    report: &QualityGateReport,
) -> std::io::Result<QualityReportPaths> {
    let dir = repo_path.join(QUALITY_LOG_DIR);
    std::fs::create_dir_all(&dir)?;

    let markdown_rel = PathBuf::from(QUALITY_LOG_DIR).join(format!("{task_id}.report.md"));
    let json_rel = PathBuf::from(QUALITY_LOG_DIR).join(format!("{task_id}.summary.json"));

    std::fs::write(repo_path.join(&markdown_rel), render_markdown(task_id, report))?;
    std::fs::write(
        repo_path.join(&json_rel),
        serde_json::to_string_pretty(report).unwrap_or_default(),
    )?;

    Ok(QualityReportPaths {
        markdown_path: markdown_rel,
        json_path: json_rel,
    })
}

fn render_markdown(task_id: &str, report: &QualityGateReport) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let _ = writeln!(out, "# Quality gate: {task_id}");
    let _ = writeln!(out);
    let _ = writeln!(out, "- ok: {}", report.ok);
    let _ = writeln!(out);
    let _ = writeln!(out, "## checks");
    let _ = writeln!(out);
    for check in &report.checks {
        let mark = if check.passed { "pass" } else { "FAIL" };
        let _ = writeln!(out, "- [{mark}] {} ({:?})", check.name, check.severity);
        for message in &check.messages {
            let _ = writeln!(out, "  - {message}");
        }
    }
    if !report.hard_rules.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## hard rules violated");
        let _ = writeln!(out);
        for rule in &report.hard_rules {
            let _ = writeln!(out, "- {rule}");
        }
    }
    out
}
