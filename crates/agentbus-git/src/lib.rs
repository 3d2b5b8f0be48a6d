// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-git
//!
//! The git preflight contract (spec §6): when a task's `references.git`
//! names a `workBranch`/`baseSha`, the worker loop must get the working
//! tree into a known-good state before invoking the engine — branch
//! checked out (created from `baseSha` if it doesn't exist locally),
//! tree clean, and `baseSha` reachable from `HEAD` — or fail closed with a
//! structured [`PreflightError`].
//!
//! Also hosts the commit-reachability probe (spec §6, "collaborator
//! interface"): given a commit, which of an allowlisted set of remotes
//! contain it, used by the closure step to confirm a completed commit
//! actually landed somewhere durable before reporting success.

use agentbus_core::GitContract;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default remotes probed by [`reachable_remotes`] when the caller does not
/// specify an allowlist (spec §6).
pub const DEFAULT_REMOTE_ALLOWLIST: &[&str] = &["origin", "github"];

/// Failure reasons the git preflight can surface. Mapped to
/// [`agentbus_core::error::BusErrorCode::GitPreflightBlocked`] by callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PreflightError {
    /// `baseSha` was required (strict EXECUTE mode) but absent from the contract.
    #[error("git contract is missing baseSha")]
    MissingBaseSha,
    /// `workBranch` was required but absent from the contract.
    #[error("git contract is missing workBranch")]
    MissingWorkBranch,
    /// The working tree has uncommitted changes and checkout was refused.
    #[error("working tree at {path} is dirty, refusing checkout of {branch}")]
    DirtyTree {
        /// Repository path.
        path: PathBuf,
        /// Branch that would have been checked out.
        branch: String,
    },
    /// `baseSha` is not an ancestor of `HEAD` after checkout.
    #[error("baseSha {base_sha} is not reachable from HEAD on {branch}")]
    BaseNotAncestor {
        /// Commit that should have been reachable.
        base_sha: String,
        /// Branch checked after the failed ancestor test.
        branch: String,
    },
    /// A `git` subprocess invocation failed or could not be spawned.
    #[error("git command failed: {0}")]
    Command(String),
}

/// Outcome of a successful preflight: the branch that was checked out and
/// whether it was newly created from `baseSha`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightOutcome {
    /// The branch now checked out in the working tree.
    pub branch: String,
    /// `true` if the branch did not exist locally and was created from `baseSha`.
    pub created: bool,
}

/// Run the git preflight contract against the repository at `repo_path`.
///
/// `strict` mirrors spec §6: when `true` (EXECUTE tasks), `baseSha` and
/// `workBranch` are mandatory; a contract without them fails closed. In
/// non-strict mode a contract with neither field is a no-op success.
///
/// # Errors
///
/// Returns [`PreflightError`] for any of the conditions spec §6 names:
/// missing required fields in strict mode, a dirty tree blocking checkout,
/// `baseSha` not reachable from `HEAD`, or an underlying git failure.
pub fn preflight(
    repo_path: &Path,
    contract: &GitContract,
    strict: bool,
) -> Result<PreflightOutcome, PreflightError> {
    let base_sha = contract.base_sha.as_deref();
    let work_branch = contract.work_branch.as_deref();

    if strict {
        let base_sha = base_sha.ok_or(PreflightError::MissingBaseSha)?;
        let work_branch = work_branch.ok_or(PreflightError::MissingWorkBranch)?;
        return run_preflight(repo_path, base_sha, work_branch);
    }

    match (base_sha, work_branch) {
        (Some(base_sha), Some(work_branch)) => run_preflight(repo_path, base_sha, work_branch),
        _ => Ok(PreflightOutcome {
            branch: current_branch(repo_path).unwrap_or_default(),
            created: false,
        }),
    }
}

fn run_preflight(
    repo_path: &Path,
    base_sha: &str,
    work_branch: &str,
) -> Result<PreflightOutcome, PreflightError> {
    if branch_exists_locally(repo_path, work_branch) {
        if is_dirty(repo_path) {
            return Err(PreflightError::DirtyTree {
                path: repo_path.to_path_buf(),
                branch: work_branch.to_string(),
            });
        }
        checkout(repo_path, work_branch)?;
        let created = false;
        ensure_ancestor(repo_path, base_sha, work_branch)?;
        return Ok(PreflightOutcome {
            branch: work_branch.to_string(),
            created,
        });
    }

    if is_dirty(repo_path) {
        return Err(PreflightError::DirtyTree {
            path: repo_path.to_path_buf(),
            branch: work_branch.to_string(),
        });
    }

    fetch_once(repo_path, DEFAULT_REMOTE_ALLOWLIST);
    create_and_checkout(repo_path, work_branch, base_sha)?;
    ensure_ancestor(repo_path, base_sha, work_branch)?;
    Ok(PreflightOutcome {
        branch: work_branch.to_string(),
        created: true,
    })
}

fn ensure_ancestor(repo_path: &Path, base_sha: &str, branch: &str) -> Result<(), PreflightError> {
    if !is_ancestor(repo_path, base_sha, "HEAD") {
        return Err(PreflightError::BaseNotAncestor {
            base_sha: base_sha.to_string(),
            branch: branch.to_string(),
        });
    }
    Ok(())
}

fn is_dirty(repo_path: &Path) -> bool {
    run_git(repo_path, &["status", "--porcelain=v1"])
        .map(|out| !out.trim().is_empty())
        .unwrap_or(false)
}

fn branch_exists_locally(repo_path: &Path, branch: &str) -> bool {
    run_git(
        repo_path,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    )
    .is_ok()
}

fn checkout(repo_path: &Path, branch: &str) -> Result<(), PreflightError> {
    run_git(repo_path, &["checkout", branch])
        .map(|_| ())
        .map_err(PreflightError::Command)
}

fn create_and_checkout(
    repo_path: &Path,
    branch: &str,
    base_sha: &str,
) -> Result<(), PreflightError> {
    run_git(repo_path, &["checkout", "-b", branch, base_sha])
        .map(|_| ())
        .map_err(PreflightError::Command)
}

fn is_ancestor(repo_path: &Path, ancestor: &str, descendant: &str) -> bool {
    Command::new("git")
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .current_dir(repo_path)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn current_branch(repo_path: &Path) -> Option<String> {
    run_git(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])
        .ok()
        .map(|s| s.trim().to_string())
}

/// Fetch every remote in `allowlist` once, best-effort (a missing remote is
/// not an error — spec §6 only requires fetching remotes that exist).
pub fn fetch_once(repo_path: &Path, allowlist: &[&str]) {
    for remote in allowlist {
        let _ = run_git(repo_path, &["fetch", "--quiet", remote]);
    }
}

/// The commit-reachability probe (spec §6): report which remotes in
/// `allowlist` have a branch containing `commit`, after fetching each.
///
/// If `required_integration_branch` is given, the result also notes whether
/// that branch (on any probed remote) contains the commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachabilityReport {
    /// Remotes that have at least one branch containing the commit.
    pub reachable_remotes: Vec<String>,
    /// `true` if `required_integration_branch` was requested and satisfied.
    pub integration_branch_satisfied: bool,
}

/// Probe whether `commit` is reachable on any branch of any remote in
/// `allowlist` (default [`DEFAULT_REMOTE_ALLOWLIST`] when `None`).
#[must_use]
pub fn reachable_remotes(
    repo_path: &Path,
    commit: &str,
    allowlist: Option<&[&str]>,
    required_integration_branch: Option<&str>,
) -> ReachabilityReport {
    let allowlist = allowlist.unwrap_or(DEFAULT_REMOTE_ALLOWLIST);
    fetch_once(repo_path, allowlist);

    let mut report = ReachabilityReport::default();
    for remote in allowlist {
        let branches = run_git(
            repo_path,
            &["branch", "-r", "--contains", commit, "--list", &format!("{remote}/*")],
        )
        .unwrap_or_default();
        if !branches.trim().is_empty() {
            report.reachable_remotes.push((*remote).to_string());
            if let Some(required) = required_integration_branch {
                if branches.lines().any(|l| l.trim().ends_with(required)) {
                    report.integration_branch_satisfied = true;
                }
            }
        }
    }
    report
}

fn run_git(repo_path: &Path, args: &[&str]) -> Result<String, String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .output()
        .map_err(|e| format!("spawn git {args:?}: {e}"))?;

    if !out.status.success() {
        return Err(format!(
            "git {:?} failed (code={:?}): {}",
            args,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}
