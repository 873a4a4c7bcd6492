//! Advisory per-working-tree committer lock.
//!
//! Git working-tree mutation must be serialized per tree, including across
//! processes, so the committer holds a PID file at
//! `<git-dir>/fsc-committer.lock` for its lifetime. Stale locks from crashed
//! processes are detected by checking whether the recorded PID is still
//! alive; a live lock makes the second committer fail fast.

use std::fs;
use std::path::{Path, PathBuf};

use crate::committer::git;
use crate::error::{Error, Result};

pub const LOCK_FILE_NAME: &str = "fsc-committer.lock";

/// RAII guard holding the committer lock; removed on drop.
#[derive(Debug)]
pub struct CommitterLock {
    path: PathBuf,
}

impl CommitterLock {
    /// Acquire the lock for the repository containing `worktree`.
    pub fn acquire(worktree: &Path) -> Result<Self> {
        let lock_path = git::git_dir(worktree)?.join(LOCK_FILE_NAME);

        if lock_path.exists() {
            if let Ok(contents) = fs::read_to_string(&lock_path) {
                if let Ok(pid) = contents.trim().parse::<u32>() {
                    if is_pid_alive(pid) {
                        return Err(Error::infra(format!(
                            "another committer (PID {pid}) holds the lock on {}",
                            worktree.display()
                        )));
                    }
                    // Stale lock from a dead process: overwrite below.
                }
            }
        }

        fs::write(&lock_path, format!("{}\n", std::process::id()))
            .map_err(|e| Error::infra(format!("failed to write committer lock: {e}")))?;
        Ok(Self { path: lock_path })
    }
}

impl Drop for CommitterLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Returns true if the process with `pid` is currently running.
///
/// `kill -0` checks existence without delivering a signal.
fn is_pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
