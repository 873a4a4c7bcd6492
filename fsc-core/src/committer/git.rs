//! Thin wrapper over the `git` binary.
//!
//! All working-tree mutation goes through argv-based `Command` invocations;
//! nothing is ever interpolated into a shell line.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Run a git command in `dir` and return its trimmed stdout.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::infra(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::infra(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Commit id of HEAD.
pub fn head_commit(dir: &Path) -> Result<String> {
    run_git(dir, &["rev-parse", "HEAD"])
}

/// Current branch name, or `None` when HEAD is detached.
pub fn current_branch(dir: &Path) -> Option<String> {
    run_git(dir, &["symbolic-ref", "--quiet", "--short", "HEAD"]).ok()
}

/// Abbreviated hash for a revision.
pub fn short_hash(dir: &Path, rev: &str) -> Result<String> {
    run_git(dir, &["rev-parse", "--short", rev])
}

/// Resolved path of the repository's git directory.
pub fn git_dir(dir: &Path) -> Result<PathBuf> {
    let out = run_git(dir, &["rev-parse", "--git-dir"])?;
    let path = PathBuf::from(out);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(dir.join(path))
    }
}

/// Whether the working tree has no pending changes.
///
/// With `ignore_untracked`, untracked files (`??` status lines) do not count
/// as dirt.
pub fn is_clean(dir: &Path, ignore_untracked: bool) -> Result<bool> {
    let status = run_git(dir, &["status", "--porcelain"])?;
    Ok(status
        .lines()
        .filter(|line| !(ignore_untracked && line.starts_with("??")))
        .count()
        == 0)
}

/// Names of local branches.
pub fn local_branches(dir: &Path) -> Result<Vec<String>> {
    let out = run_git(dir, &["branch", "--format", "%(refname:short)"])?;
    Ok(out.lines().map(|l| l.trim().to_string()).collect())
}
