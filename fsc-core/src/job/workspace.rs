//! Per-job workspace preparation and cleanup.
//!
//! Remote inputs are shallow-cloned into a temp directory; local inputs are
//! copied so the pipeline never works in the user's checkout directly. The
//! workspace is the directory handed to the analysis stage and the code
//! committer. Remote workspaces are removed on completion; local-path
//! workspaces are kept on success so the created branches remain reachable,
//! and removed like the others on failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::job::{JobInput, JobInputKind};

/// A prepared per-job working directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    /// Whether cleanup on success should remove the directory.
    remove_on_success: bool,
}

/// Deterministic workspace location for a job id.
pub fn workspace_dir(job_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fsc-{job_id}"))
}

impl Workspace {
    /// Clone or copy the job's repository into its workspace directory.
    pub fn prepare(input: &JobInput, job_id: &str) -> Result<Self> {
        let path = workspace_dir(job_id);
        if path.exists() {
            fs::remove_dir_all(&path)
                .map_err(|e| Error::infra(format!("{}: {e}", path.display())))?;
        }

        match input.kind {
            JobInputKind::GithubUrl | JobInputKind::GitUrl => {
                clone_repo(&input.url, &path)?;
                Ok(Self {
                    path,
                    remove_on_success: true,
                })
            }
            JobInputKind::LocalPath => {
                copy_tree(Path::new(&input.url), &path)?;
                Ok(Self {
                    path,
                    remove_on_success: false,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace after a successful run, where the input kind
    /// calls for it.
    pub fn cleanup_on_success(self) {
        if self.remove_on_success {
            self.remove();
        } else {
            log::info!("workspace kept at {}", self.path.display());
        }
    }

    /// Remove the workspace unconditionally (failure paths).
    pub fn cleanup_on_failure(self) {
        self.remove();
    }

    fn remove(self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::warn!("failed to remove workspace {}: {e}", self.path.display());
        }
    }
}

/// `git clone --depth 1` into `dest`.
fn clone_repo(url: &str, dest: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(dest)
        .output()
        .map_err(|e| Error::infra(format!("failed to run git clone: {e}")))?;
    if !output.status.success() {
        return Err(Error::infra(format!(
            "git clone of {url} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Recursive copy of a directory tree.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::infra(format!(
            "not a directory: {}",
            src.display()
        )));
    }
    fs::create_dir_all(dest).map_err(|e| Error::infra(format!("{}: {e}", dest.display())))?;
    for entry in fs::read_dir(src).map_err(|e| Error::infra(format!("{}: {e}", src.display())))? {
        let entry = entry.map_err(|e| Error::infra(format!("{}: {e}", src.display())))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| Error::infra(format!("{}: {e}", from.display())))?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            fs::copy(&from, &to).map_err(|e| Error::infra(format!("{}: {e}", from.display())))?;
        }
        // Symlinks are skipped: a workspace copy must not reach outside
        // itself.
    }
    Ok(())
}
