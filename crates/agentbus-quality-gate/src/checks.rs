// SPDX-License-Identifier: MIT OR Apache-2.0
//! The eight deterministic checks (spec §4.9).

use crate::diff::{read_at_revision, read_working_tree, ChangeSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Whether a failed check blocks closure or is advisory-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Closure is blocked (goes into `hardRules`/`errors`).
    Blocking,
    /// Non-blocking; surfaced in `warnings` only.
    Advisory,
}

/// The outcome of a single named check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// The check's stable name, e.g. `"no-merge-conflict-markers"`.
    pub name: String,
    /// `true` if the check found nothing to flag.
    pub passed: bool,
    /// Blocking or advisory.
    pub severity: Severity,
    /// Human-readable detail lines, empty when `passed`.
    pub messages: Vec<String>,
}

impl CheckResult {
    fn pass(name: &str, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            severity,
            messages: Vec::new(),
        }
    }

    fn fail(name: &str, severity: Severity, messages: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            severity,
            messages,
        }
    }
}

/// Tunable knobs for the checks that need thresholds or path conventions.
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Path prefixes (repo-relative) that mark recognized temp/scratch output.
    pub temp_prefixes: Vec<String>,
    /// Directory whose changes require an accompanying test file change.
    pub runtime_scripts_dir: String,
    /// Above this many net-added lines with zero deletions, flag as pure-additive.
    pub max_pure_addition_lines: usize,
    /// Above this additions-to-deletions ratio (when deletions > 0), flag as unbalanced.
    pub max_addition_to_deletion_ratio: f64,
    /// Glob-style suffix identifying skill files (matched via `ends_with`).
    pub skill_file_suffix: String,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            temp_prefixes: vec![
                "tmp/".into(),
                ".tmp/".into(),
                "__pycache__/".into(),
                ".pytest_cache/".into(),
                "node_modules/.cache/".into(),
            ],
            runtime_scripts_dir: "scripts/runtime/".into(),
            max_pure_addition_lines: 800,
            max_addition_to_deletion_ratio: 20.0,
            skill_file_suffix: "SKILL.md".into(),
        }
    }
}

struct EscapePattern {
    name: &'static str,
    regex: Regex,
}

fn escape_patterns() -> &'static [EscapePattern] {
    static PATTERNS: OnceLock<Vec<EscapePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let defs: &[(&str, &str)] = &[
            ("todo-fixme", r"(?i)\b(TODO|FIXME)\b"),
            (
                "lint-disable",
                r"(?i)(eslint-disable|#\s*noqa|//\s*noqa|#\[allow\(clippy::all\)\]|pylint:\s*disable)",
            ),
            ("empty-catch", r"catch\s*\([^)]*\)\s*\{\s*\}"),
            ("truthy-short-circuit", r"\|\|\s*true\b|&&\s*false\b"),
            ("any-typing", r":\s*any\b"),
            ("unknown-cast", r"as unknown as"),
            ("bare-except", r"^\s*except\s*:\s*$"),
        ];
        defs.iter()
            .map(|(name, pattern)| EscapePattern {
                name,
                regex: Regex::new(pattern).expect("static escape pattern compiles"),
            })
            .collect()
    })
}

/// 1. Scan the current working-tree content of every changed path for
/// merge-conflict sentinels.
pub fn no_merge_conflict_markers(repo_path: &Path, changes: &ChangeSet) -> CheckResult {
    let name = "no-merge-conflict-markers";
    let mut hits = Vec::new();
    for path in changes.all_paths() {
        let Some(content) = read_working_tree(repo_path, &path) else {
            continue;
        };
        for (lineno, line) in content.lines().enumerate() {
            if line.starts_with("<<<<<<< ") || line.starts_with(">>>>>>> ") || line == "=======" {
                hits.push(format!("{path}:{}: {line}", lineno + 1));
            }
        }
    }
    if hits.is_empty() {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(name, Severity::Blocking, hits)
    }
}

/// 2. Scan only additions (diff hunks plus whole untracked files) for
/// quality-escape patterns.
pub fn no_quality_escapes(repo_path: &Path, changes: &ChangeSet) -> CheckResult {
    let name = "no-quality-escapes";
    let mut hits = Vec::new();

    for file in &changes.files {
        if file.is_binary {
            continue;
        }
        for (lineno, text) in &file.added_lines {
            for pattern in escape_patterns() {
                if pattern.regex.is_match(text) {
                    hits.push(format!("{}:{lineno}: [{}] {}", file.path, pattern.name, text.trim()));
                }
            }
        }
    }
    for path in &changes.untracked {
        let Some(content) = read_working_tree(repo_path, path) else {
            continue;
        };
        for (lineno, text) in content.lines().enumerate() {
            for pattern in escape_patterns() {
                if pattern.regex.is_match(text) {
                    hits.push(format!("{path}:{}: [{}] {}", lineno + 1, pattern.name, text.trim()));
                }
            }
        }
    }

    if hits.is_empty() {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(name, Severity::Blocking, hits)
    }
}

/// 3. The same scan, but on the pre-change content of touched tracked
/// files, reporting hits that predate the change as a non-blocking advisory.
pub fn legacy_quality_debt_advisory(
    repo_path: &Path,
    base_ref: &str,
    changes: &ChangeSet,
) -> CheckResult {
    let name = "legacy-quality-debt-advisory";
    let mut hits = Vec::new();

    for file in &changes.files {
        if file.is_binary || file.is_new_file {
            continue;
        }
        let Some(original) = read_at_revision(repo_path, base_ref, &file.path) else {
            continue;
        };
        let removed: std::collections::HashSet<&str> =
            file.removed_lines.iter().map(|(_, t)| t.as_str()).collect();
        for (lineno, line) in original.lines().enumerate() {
            if removed.contains(line) {
                continue; // this change already removed the offending line
            }
            for pattern in escape_patterns() {
                if pattern.regex.is_match(line) {
                    hits.push(format!(
                        "{}:{}: [{}] pre-existing: {}",
                        file.path,
                        lineno + 1,
                        pattern.name,
                        line.trim()
                    ));
                }
            }
        }
    }

    if hits.is_empty() {
        CheckResult::pass(name, Severity::Advisory)
    } else {
        CheckResult::fail(name, Severity::Advisory, hits)
    }
}

/// 4. Reject changes introducing paths under recognized temp prefixes.
pub fn no_temp_artifacts(changes: &ChangeSet, config: &QualityGateConfig) -> CheckResult {
    let name = "no-temp-artifacts";
    let hits: Vec<String> = changes
        .all_paths()
        .into_iter()
        .filter(|path| {
            config.temp_prefixes.iter().any(|prefix| {
                let needle = format!("/{prefix}");
                path.starts_with(prefix.as_str()) || path.contains(needle.as_str())
            })
        })
        .collect();
    if hits.is_empty() {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(name, Severity::Blocking, hits)
    }
}

/// 5. If the runtime-scripts directory changed, a matching test file must
/// be part of the same delta.
pub fn runtime_script_change_has_tests(
    changes: &ChangeSet,
    config: &QualityGateConfig,
) -> CheckResult {
    let name = "runtime-script-change-has-tests";
    let paths = changes.all_paths();
    let script_changed: Vec<&String> = paths
        .iter()
        .filter(|p| p.starts_with(config.runtime_scripts_dir.as_str()))
        .collect();
    if script_changed.is_empty() {
        return CheckResult::pass(name, Severity::Blocking);
    }
    let has_test = paths.iter().any(|p| p.to_lowercase().contains("test"));
    if has_test {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(
            name,
            Severity::Blocking,
            script_changed
                .into_iter()
                .map(|p| format!("{p}: runtime script changed with no accompanying test file"))
                .collect(),
        )
    }
}

/// 6. Reject pure-additive deltas above a threshold, and additions that
/// grossly outweigh deletions.
pub fn diff_volume_balanced(
    repo_path: &Path,
    changes: &ChangeSet,
    config: &QualityGateConfig,
) -> CheckResult {
    let name = "diff-volume-balanced";
    let tracked_added: usize = changes.files.iter().map(|f| f.added_lines.len()).sum();
    let untracked_added: usize = changes
        .untracked
        .iter()
        .filter_map(|p| read_working_tree(repo_path, p))
        .map(|content| content.lines().count())
        .sum();
    let added = tracked_added + untracked_added;
    let removed: usize = changes.files.iter().map(|f| f.removed_lines.len()).sum();

    if removed == 0 && added > config.max_pure_addition_lines {
        return CheckResult::fail(
            name,
            Severity::Blocking,
            vec![format!(
                "pure-additive delta of {added} lines exceeds threshold of {}",
                config.max_pure_addition_lines
            )],
        );
    }
    if removed > 0 {
        let ratio = added as f64 / removed as f64;
        if ratio > config.max_addition_to_deletion_ratio {
            return CheckResult::fail(
                name,
                Severity::Blocking,
                vec![format!(
                    "additions ({added}) outweigh deletions ({removed}) by {ratio:.1}x, above the {:.1}x limit",
                    config.max_addition_to_deletion_ratio
                )],
            );
        }
    }
    CheckResult::pass(name, Severity::Blocking)
}

/// `true` for a line with no content worth fingerprinting (blank, or only
/// punctuation/braces).
fn is_trivial_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.chars().all(|c| !c.is_alphanumeric())
}

/// 7. Sliding window of 3 consecutive non-trivial added lines; any window
/// repeated at more than one location (same file or different) is duplication.
pub fn no_duplicate_added_blocks(changes: &ChangeSet) -> CheckResult {
    const WINDOW: usize = 3;
    let name = "no-duplicate-added-blocks";
    let mut seen: HashMap<String, Vec<String>> = HashMap::new();

    for file in &changes.files {
        if file.is_binary {
            continue;
        }
        // Consecutive runs: lines whose new-file numbers increase by exactly 1.
        let mut run: Vec<(usize, &str)> = Vec::new();
        let mut flush = |run: &mut Vec<(usize, &str)>, seen: &mut HashMap<String, Vec<String>>| {
            if run.len() >= WINDOW {
                for window in run.windows(WINDOW) {
                    if window.iter().any(|(_, t)| is_trivial_line(t)) {
                        continue;
                    }
                    let key = window.iter().map(|(_, t)| t.trim()).collect::<Vec<_>>().join("\n");
                    let loc = format!("{}:{}", file.path, window[0].0);
                    seen.entry(key).or_default().push(loc);
                }
            }
            run.clear();
        };
        for &(lineno, ref text) in &file.added_lines {
            if let Some(&(last, _)) = run.last() {
                if lineno != last + 1 {
                    flush(&mut run, &mut seen);
                }
            }
            run.push((lineno, text.as_str()));
        }
        flush(&mut run, &mut seen);
    }

    let hits: Vec<String> = seen
        .into_iter()
        .filter(|(_, locs)| locs.len() > 1)
        .map(|(key, locs)| {
            let preview = key.lines().next().unwrap_or_default();
            format!("duplicated 3-line block starting \"{preview}\" at {}", locs.join(", "))
        })
        .collect();

    if hits.is_empty() {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(name, Severity::Blocking, hits)
    }
}

/// 8. Validate changed skill files (identified by `skill_file_suffix`),
/// only run when at least one such file changed.
pub fn skill_file_validators(
    repo_path: &Path,
    changes: &ChangeSet,
    config: &QualityGateConfig,
) -> Option<CheckResult> {
    let name = "skill-file-validators";
    let skill_files: Vec<String> = changes
        .all_paths()
        .into_iter()
        .filter(|p| p.ends_with(config.skill_file_suffix.as_str()))
        .collect();
    if skill_files.is_empty() {
        return None;
    }

    let mut hits = Vec::new();
    for path in &skill_files {
        let Some(content) = read_working_tree(repo_path, path) else {
            hits.push(format!("{path}: could not read working-tree content"));
            continue;
        };
        if !content.starts_with("---\n") {
            hits.push(format!("{path}: missing frontmatter (expected leading '---')"));
            continue;
        }
        let end = content[4..].find("\n---").map(|i| i + 4);
        let Some(end) = end else {
            hits.push(format!("{path}: unterminated frontmatter block"));
            continue;
        };
        let frontmatter = &content[4..end];
        if !frontmatter.contains("name:") {
            hits.push(format!("{path}: frontmatter missing 'name'"));
        }
        if !frontmatter.contains("description:") {
            hits.push(format!("{path}: frontmatter missing 'description'"));
        }
    }

    Some(if hits.is_empty() {
        CheckResult::pass(name, Severity::Blocking)
    } else {
        CheckResult::fail(name, Severity::Blocking, hits)
    })
}
