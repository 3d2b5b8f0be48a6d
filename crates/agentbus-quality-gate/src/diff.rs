// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified-diff collection and parsing. Shells out to `git diff -U0` the
//! same way [`agentbus_git`] shells out for preflight — no diff-parsing
//! crate, just enough line-oriented parsing to drive the quality checks.

use std::path::Path;
use std::process::Command;

/// A single line within a diff hunk, tagged with its line number in the
/// file that line number is relative to (new file for additions, old file
/// for deletions).
pub type DiffLine = (usize, String);

/// One file's worth of parsed diff.
#[derive(Debug, Clone, Default)]
pub struct FileDiff {
    /// Repo-relative path (the "b/" side; equals the "a/" side for anything
    /// but a rename).
    pub path: String,
    /// `true` if this file did not exist at the base revision.
    pub is_new_file: bool,
    /// `true` if git reported this as a binary diff (no line data).
    pub is_binary: bool,
    /// Added lines, in file order, with their new-file line numbers.
    pub added_lines: Vec<DiffLine>,
    /// Removed lines, in file order, with their old-file line numbers.
    pub removed_lines: Vec<DiffLine>,
}

impl FileDiff {
    /// Added line text only, in order.
    pub fn added_text(&self) -> impl Iterator<Item = &str> {
        self.added_lines.iter().map(|(_, t)| t.as_str())
    }
}

/// Failure collecting or parsing a diff.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The underlying `git` invocation failed or could not be spawned.
    #[error("git command failed: {0}")]
    Git(String),
}

/// The full set of changes to inspect: tracked-file diff hunks plus
/// untracked files (spec §4.9: "untracked added files are scanned whole").
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Per-file diffs for tracked files with a change relative to the base.
    pub files: Vec<FileDiff>,
    /// Repo-relative paths of untracked files present in the working tree.
    pub untracked: Vec<String>,
}

impl ChangeSet {
    /// Narrow this change set to paths [`agentbus_glob::IncludeExcludeGlobs`]
    /// allows (spec §4.9: "a scope include/exclude policy").
    #[must_use]
    pub fn scoped(self, scope: &agentbus_glob::IncludeExcludeGlobs) -> Self {
        Self {
            files: self
                .files
                .into_iter()
                .filter(|f| scope.decide_str(&f.path).is_allowed())
                .collect(),
            untracked: self
                .untracked
                .into_iter()
                .filter(|p| scope.decide_str(p).is_allowed())
                .collect(),
        }
    }

    /// All changed repo-relative paths: tracked diffs plus untracked files.
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.iter().map(|f| f.path.clone()).collect();
        paths.extend(self.untracked.iter().cloned());
        paths
    }
}

/// Collect the working-tree diff against `base_ref` (default `HEAD`),
/// covering both a committed range and uncommitted edits in one pass, plus
/// the untracked-file list.
///
/// # Errors
///
/// Returns [`DiffError::Git`] if `git diff` or `git ls-files` fails to run.
pub fn collect_change_set(repo_path: &Path, base_ref: Option<&str>) -> Result<ChangeSet, DiffError> {
    let base = base_ref.unwrap_or("HEAD");
    let diff_text = run_git(repo_path, &["diff", "-U0", "--no-color", base])?;
    let files = parse_unified_diff(&diff_text);

    let untracked_text = run_git(
        repo_path,
        &["ls-files", "--others", "--exclude-standard"],
    )?;
    let untracked = untracked_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok(ChangeSet { files, untracked })
}

/// Parse `git diff -U0` output into per-file [`FileDiff`]s.
pub fn parse_unified_diff(diff_text: &str) -> Vec<FileDiff> {
    let mut result = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut new_line = 0usize;
    let mut old_line = 0usize;

    for line in diff_text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(f) = current.take() {
                result.push(f);
            }
            current = Some(FileDiff {
                path: parse_diff_git_path(rest),
                ..Default::default()
            });
            continue;
        }
        let Some(file) = current.as_mut() else { continue };

        if line.starts_with("new file mode") {
            file.is_new_file = true;
        } else if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
            file.is_binary = true;
        } else if let Some(hunk) = line.strip_prefix("@@ ") {
            let (old_start, new_start) = parse_hunk_header(hunk);
            old_line = old_start;
            new_line = new_start;
        } else if let Some(text) = line.strip_prefix('+') {
            if !line.starts_with("+++") {
                file.added_lines.push((new_line, text.to_string()));
                new_line += 1;
            }
        } else if let Some(text) = line.strip_prefix('-') {
            if !line.starts_with("---") {
                file.removed_lines.push((old_line, text.to_string()));
                old_line += 1;
            }
        } else if let Some(text) = line.strip_prefix(' ') {
            let _ = text;
            new_line += 1;
            old_line += 1;
        }
    }
    if let Some(f) = current.take() {
        result.push(f);
    }
    result
}

/// `"a/foo b/foo"` (or `"a/foo b/bar"` for a rename) -> `"foo"` (the "b/" side).
fn parse_diff_git_path(rest: &str) -> String {
    if let Some(idx) = rest.rfind(" b/") {
        return rest[idx + 3..].to_string();
    }
    rest.trim_start_matches("a/").to_string()
}

/// `"-12,3 +14,5 @@ fn foo() {{"` -> `(12, 14)`. Missing counts (e.g. `-12 +14`,
/// meaning a single-line hunk) default correctly since the comma-count
/// suffix is optional in the header grammar.
fn parse_hunk_header(hunk: &str) -> (usize, usize) {
    let mut parts = hunk.splitn(2, "@@");
    let ranges = parts.next().unwrap_or_default();
    let mut old_start = 0usize;
    let mut new_start = 0usize;
    for token in ranges.split_whitespace() {
        if let Some(r) = token.strip_prefix('-') {
            old_start = r.split(',').next().unwrap_or("0").parse().unwrap_or(0);
        } else if let Some(r) = token.strip_prefix('+') {
            new_start = r.split(',').next().unwrap_or("0").parse().unwrap_or(0);
        }
    }
    (old_start, new_start)
}

/// Read a path's content at a given revision (e.g. `"HEAD"`, a base sha),
/// returning `None` if the file did not exist there.
#[must_use]
pub fn read_at_revision(repo_path: &Path, revision: &str, path: &str) -> Option<String> {
    run_git(repo_path, &["show", &format!("{revision}:{path}")]).ok()
}

/// Read a path's current working-tree content, returning `None` on any I/O error.
#[must_use]
pub fn read_working_tree(repo_path: &Path, path: &str) -> Option<String> {
    std::fs::read_to_string(repo_path.join(path)).ok()
}

fn run_git(repo_path: &Path, args: &[&str]) -> Result<String, DiffError> {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .output()
        .map_err(|e| DiffError::Git(format!("spawn git {args:?}: {e}")))?;
    if !out.status.success() {
        return Err(DiffError::Git(format!(
            "git {:?} failed (code={:?}): {}",
            args,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}
