//! Integration of task results into a git working tree.
//!
//! Each result with a non-empty diff becomes one branch with one commit,
//! created from the commit HEAD pointed at when the committer started. The
//! working tree is restored after every result and must be bit-identical to
//! its pre-committer contents when `commit_all_changes` returns: branches
//! live beside the original commit, HEAD is back where it was, the tree is
//! clean.
//!
//! Working-tree mutation is serialized per tree through the advisory
//! lockfile in [`lock`]; a second committer on the same tree fails fast.

pub mod git;
pub mod lock;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::committer::lock::CommitterLock;
use crate::error::{Error, Result};
use crate::task::TaskResult;

/// Dirty-tree handling and safety options.
#[derive(Debug, Clone, Default)]
pub struct CommitterOptions {
    /// `git stash push` before work, `git stash pop` at the very end.
    pub auto_stash: bool,
    /// Create a `WIP auto-commit` on the current branch instead of stashing.
    pub auto_commit: bool,
    /// Untracked files do not make the tree dirty.
    pub ignore_untracked: bool,
    /// Create `<prefix>-<unix-millis>` at HEAD before mutating anything.
    pub backup_branch: Option<String>,
}

/// Per-result integration outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub task_id: String,
    pub task_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a committer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub results: Vec<CommitOutcome>,
}

/// Where in the per-result protocol a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Branching,
    Applying,
    Committing,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Self::Branching => "branching",
            Self::Applying => "applying diff",
            Self::Committing => "committing",
        }
    }
}

/// Integrates a set of task results into an on-disk working tree.
pub struct CodeCommitter {
    results: Vec<TaskResult>,
    worktree: PathBuf,
    options: CommitterOptions,
}

impl CodeCommitter {
    pub fn new(
        results: Vec<TaskResult>,
        worktree: impl Into<PathBuf>,
        options: CommitterOptions,
    ) -> Self {
        Self {
            results,
            worktree: worktree.into(),
            options,
        }
    }

    /// Run the full integration protocol and return the summary.
    pub fn commit_all_changes(&self) -> Result<CommitSummary> {
        let dir = self.worktree.as_path();
        let _lock = CommitterLock::acquire(dir)?;

        // Base for every task branch: HEAD as found.
        let base_commit = git::head_commit(dir)?;
        let original_ref = git::current_branch(dir);

        if let Some(prefix) = &self.options.backup_branch {
            let name = format!("{prefix}-{}", chrono::Utc::now().timestamp_millis());
            git::run_git(dir, &["branch", &name, &base_commit])?;
            log::info!("created backup branch {name} at {base_commit}");
        }

        // Dirty-tree policy runs once, up front. Per-result checks below
        // then see whatever state the policy produced.
        let mut stashed = false;
        if !git::is_clean(dir, self.options.ignore_untracked)? {
            if self.options.auto_stash {
                git::run_git(dir, &["stash", "push", "-u", "-m", "fsc committer auto-stash"])?;
                stashed = true;
            } else if self.options.auto_commit {
                git::run_git(dir, &["add", "-A"])?;
                git::run_git(dir, &["commit", "-q", "-m", "WIP auto-commit"])?;
            }
        }
        // Restore target: HEAD after the policy ran (differs from the base
        // only when a WIP auto-commit was created).
        let restore_commit = git::head_commit(dir)?;
        // Untracked files deliberately left in place must survive restore,
        // so `git clean` is skipped for them.
        let keep_untracked = !git::is_clean(dir, false).unwrap_or(true);

        let mut outcomes = Vec::with_capacity(self.results.len());
        for result in &self.results {
            outcomes.push(self.integrate(
                dir,
                result,
                &base_commit,
                &restore_commit,
                original_ref.as_deref(),
                keep_untracked,
            ));
        }

        if stashed {
            if let Err(e) = git::run_git(dir, &["stash", "pop"]) {
                log::warn!("failed to pop committer auto-stash: {e}");
            }
        }

        let successful = outcomes.iter().filter(|o| o.success).count();
        Ok(CommitSummary {
            total_tasks: outcomes.len(),
            successful_tasks: successful,
            failed_tasks: outcomes.len() - successful,
            results: outcomes,
        })
    }

    /// Integrate one result; always attempts working-tree restore.
    fn integrate(
        &self,
        dir: &Path,
        result: &TaskResult,
        base_commit: &str,
        restore_commit: &str,
        original_ref: Option<&str>,
        keep_untracked: bool,
    ) -> CommitOutcome {
        // No diff means the task changed nothing: recorded as success
        // without touching git.
        if !result.has_diff() {
            return CommitOutcome {
                task_id: result.id.clone(),
                task_title: result.title.clone(),
                branch_name: None,
                commit_hash: None,
                success: true,
                error: None,
            };
        }

        match git::is_clean(dir, self.options.ignore_untracked) {
            Ok(true) => {}
            Ok(false) => {
                return CommitOutcome {
                    task_id: result.id.clone(),
                    task_title: result.title.clone(),
                    branch_name: None,
                    commit_hash: None,
                    success: false,
                    error: Some("working tree is not in a clean state".to_string()),
                };
            }
            Err(e) => {
                return CommitOutcome {
                    task_id: result.id.clone(),
                    task_title: result.title.clone(),
                    branch_name: None,
                    commit_hash: None,
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        }

        let branch = format!(
            "task-{}-{}",
            result.id,
            chrono::Utc::now().timestamp_millis()
        );
        let integrated = self.branch_apply_commit(dir, result, &branch, base_commit);

        // Cleanup runs no matter what happened above.
        if let Err(e) = restore_tree(dir, original_ref, restore_commit, keep_untracked) {
            log::error!(
                "critical: failed to restore working tree at {}: {e}",
                dir.display()
            );
        }

        match integrated {
            Ok(commit_hash) => CommitOutcome {
                task_id: result.id.clone(),
                task_title: result.title.clone(),
                branch_name: Some(branch),
                commit_hash: Some(commit_hash),
                success: true,
                error: None,
            },
            Err((phase, e)) => {
                // A failed integration must not leave its branch behind.
                let _ = git::run_git(dir, &["branch", "-q", "-D", &branch]);
                CommitOutcome {
                    task_id: result.id.clone(),
                    task_title: result.title.clone(),
                    branch_name: None,
                    commit_hash: None,
                    success: false,
                    error: Some(format!("while {}: {e}", phase.label())),
                }
            }
        }
    }

    /// Steps 2–4 of the per-result protocol. Returns the short commit hash.
    fn branch_apply_commit(
        &self,
        dir: &Path,
        result: &TaskResult,
        branch: &str,
        base_commit: &str,
    ) -> std::result::Result<String, (Phase, Error)> {
        git::run_git(dir, &["checkout", "-q", "-b", branch, base_commit])
            .map_err(|e| (Phase::Branching, e))?;

        // `--index` both applies and stages exactly the diff's changes, so
        // unrelated untracked files never leak into the commit.
        let diff_file = write_temp_file(result.git_diff.as_deref().unwrap_or(""), ".diff")
            .map_err(|e| (Phase::Applying, e))?;
        git::run_git(
            dir,
            &[
                "apply",
                "--index",
                "--whitespace=fix",
                &diff_file.path().display().to_string(),
            ],
        )
        .map_err(|e| (Phase::Applying, Error::Apply(e.to_string())))?;

        let message_file = write_temp_file(&commit_message(result), ".msg")
            .map_err(|e| (Phase::Committing, e))?;
        git::run_git(
            dir,
            &[
                "commit",
                "-q",
                "-F",
                &message_file.path().display().to_string(),
            ],
        )
        .map_err(|e| (Phase::Committing, e))?;

        git::short_hash(dir, "HEAD").map_err(|e| (Phase::Committing, e))
    }

    /// Render the human-oriented report for a summary.
    pub fn render_report(&self, summary: &CommitSummary, sink: &mut dyn Write) -> io::Result<()> {
        writeln!(sink, "Commit summary for {}", self.worktree.display())?;
        writeln!(
            sink,
            "  {} task(s): {} committed, {} failed",
            summary.total_tasks, summary.successful_tasks, summary.failed_tasks
        )?;
        for outcome in &summary.results {
            let mark = if outcome.success { "✓" } else { "✗" };
            let branch = outcome.branch_name.as_deref().unwrap_or("-");
            let hash = outcome.commit_hash.as_deref().unwrap_or("-");
            write!(
                sink,
                "  {mark} {} {branch} {hash} {}",
                outcome.task_id, outcome.task_title
            )?;
            if let Some(error) = &outcome.error {
                write!(sink, " ({error})")?;
            }
            writeln!(sink)?;
        }
        Ok(())
    }
}

/// Check out the original ref, hard-reset to the restore commit, and drop
/// leftovers from the integration attempt.
fn restore_tree(
    dir: &Path,
    original_ref: Option<&str>,
    restore_commit: &str,
    keep_untracked: bool,
) -> Result<()> {
    match original_ref {
        Some(branch) => git::run_git(dir, &["checkout", "-q", branch])?,
        None => git::run_git(dir, &["checkout", "-q", restore_commit])?,
    };
    git::run_git(dir, &["reset", "-q", "--hard", restore_commit])?;
    if !keep_untracked {
        git::run_git(dir, &["clean", "-fdq"])?;
    }
    Ok(())
}

/// The commit message for one result.
///
/// Double quotes inside text fields are escaped; the message reaches git via
/// `commit -F`, never through a shell line.
fn commit_message(result: &TaskResult) -> String {
    let esc = |s: &str| s.replace('"', "\\\"");
    let completed = result
        .completed_at
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "{} Task {}: {}\n\nTask Description: {}\n\nReport: {}\n\nStatus: {}\nCompleted: {}",
        result.status.glyph(),
        result.id,
        esc(&result.title),
        esc(&result.description),
        esc(&result.report),
        result.status,
        completed
    )
}

fn write_temp_file(content: &str, suffix: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("fsc-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| Error::infra(format!("failed to create temp file: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::infra(format!("failed to write temp file: {e}")))?;
    file.flush()
        .map_err(|e| Error::infra(format!("failed to write temp file: {e}")))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::git::run_git;
    use crate::task::{Task, TaskStatus};
    use std::fs;
    use tempfile::TempDir;

    // ── Fixtures ──────────────────────────────────────────────────────────

    fn init_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        run_git(dir, &["init", "-q", "-b", "main"]).unwrap();
        run_git(dir, &["config", "user.name", "test"]).unwrap();
        run_git(dir, &["config", "user.email", "test@localhost"]).unwrap();
        fs::write(dir.join("README.md"), "hello\n").unwrap();
        run_git(dir, &["add", "."]).unwrap();
        run_git(dir, &["commit", "-q", "-m", "initial"]).unwrap();
        tmp
    }

    fn edit_readme_diff() -> String {
        "--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-hello\n+hello world\n".to_string()
    }

    fn new_file_diff(name: &str) -> String {
        format!("--- /dev/null\n+++ b/{name}\n@@ -0,0 +1 @@\n+created\n")
    }

    fn result_with_diff(id: &str, title: &str, diff: Option<String>) -> TaskResult {
        let task = Task {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("description of {id}"),
            priority: 1,
        };
        let mut result = TaskResult::new(&task, TaskStatus::Success, format!("report for {id}"));
        result.completed_at = Some(1_700_000_000_000);
        result.git_diff = diff;
        result
    }

    fn task_branches(dir: &std::path::Path) -> Vec<String> {
        git::local_branches(dir)
            .unwrap()
            .into_iter()
            .filter(|b| b.starts_with("task-"))
            .collect()
    }

    // ── Happy path ────────────────────────────────────────────────────────

    #[test]
    fn integrates_each_result_as_one_branch_one_commit() {
        let repo = init_repo();
        let dir = repo.path();
        let original = git::head_commit(dir).unwrap();

        let committer = CodeCommitter::new(
            vec![
                result_with_diff("T1", "Edit readme", Some(edit_readme_diff())),
                result_with_diff("T2", "Add file", Some(new_file_diff("new.txt"))),
            ],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.successful_tasks, 2);
        assert_eq!(summary.failed_tasks, 0);

        // HEAD is back on the original commit with a clean tree.
        assert_eq!(git::head_commit(dir).unwrap(), original);
        assert_eq!(git::current_branch(dir).as_deref(), Some("main"));
        assert!(git::is_clean(dir, false).unwrap());
        assert_eq!(fs::read_to_string(dir.join("README.md")).unwrap(), "hello\n");
        assert!(!dir.join("new.txt").exists());

        // One branch per result, exactly one commit ahead of the base.
        let branches = task_branches(dir);
        assert_eq!(branches.len(), 2);
        for branch in &branches {
            let ahead = run_git(
                dir,
                &["rev-list", "--count", &format!("{original}..{branch}")],
            )
            .unwrap();
            assert_eq!(ahead, "1");
        }
        assert!(branches.iter().any(|b| b.starts_with("task-T1-")));
        assert!(branches.iter().any(|b| b.starts_with("task-T2-")));

        for outcome in &summary.results {
            assert!(outcome.success);
            assert!(outcome.branch_name.is_some());
            assert!(outcome.commit_hash.is_some());
        }
    }

    #[test]
    fn commit_message_follows_the_template() {
        let repo = init_repo();
        let dir = repo.path();

        let committer = CodeCommitter::new(
            vec![result_with_diff(
                "T1",
                "Say \"hello\"",
                Some(edit_readme_diff()),
            )],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();
        let branch = summary.results[0].branch_name.clone().unwrap();

        let message = run_git(dir, &["log", "--format=%B", "-n", "1", &branch]).unwrap();
        assert!(message.starts_with("✓ Task T1: Say \\\"hello\\\""));
        assert!(message.contains("Task Description: description of T1"));
        assert!(message.contains("Report: report for T1"));
        assert!(message.contains("Status: success"));
        assert!(message.contains("Completed: 2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn empty_diff_is_recorded_as_success_without_a_branch() {
        let repo = init_repo();
        let dir = repo.path();

        let committer = CodeCommitter::new(
            vec![
                result_with_diff("T1", "No change", None),
                result_with_diff("T2", "Whitespace diff", Some("   \n".to_string())),
            ],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.successful_tasks, 2);
        assert!(task_branches(dir).is_empty());
        assert!(summary.results.iter().all(|o| o.branch_name.is_none()));
    }

    // ── Dirty-tree policies ───────────────────────────────────────────────

    #[test]
    fn dirty_tree_without_policy_fails_every_result() {
        let repo = init_repo();
        let dir = repo.path();
        fs::write(dir.join("README.md"), "uncommitted edit\n").unwrap();
        let original = git::head_commit(dir).unwrap();

        let committer = CodeCommitter::new(
            vec![
                result_with_diff("T1", "A", Some(new_file_diff("a.txt"))),
                result_with_diff("T2", "B", Some(new_file_diff("b.txt"))),
            ],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.failed_tasks, 2);
        for outcome in &summary.results {
            assert!(!outcome.success);
            assert!(outcome
                .error
                .as_deref()
                .unwrap()
                .contains("not in a clean state"));
        }
        assert!(task_branches(dir).is_empty());
        assert_eq!(git::head_commit(dir).unwrap(), original);
        assert_eq!(
            fs::read_to_string(dir.join("README.md")).unwrap(),
            "uncommitted edit\n"
        );
    }

    #[test]
    fn auto_stash_preserves_the_edit_and_commits_normally() {
        let repo = init_repo();
        let dir = repo.path();
        fs::write(dir.join("README.md"), "work in progress\n").unwrap();
        let original = git::head_commit(dir).unwrap();

        let committer = CodeCommitter::new(
            vec![result_with_diff("T1", "Add file", Some(new_file_diff("c.txt")))],
            dir,
            CommitterOptions {
                auto_stash: true,
                ..CommitterOptions::default()
            },
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.successful_tasks, 1);
        assert_eq!(task_branches(dir).len(), 1);
        assert_eq!(git::head_commit(dir).unwrap(), original);
        // The stash pop restored the in-progress edit.
        assert_eq!(
            fs::read_to_string(dir.join("README.md")).unwrap(),
            "work in progress\n"
        );
    }

    #[test]
    fn auto_commit_makes_a_wip_commit_and_proceeds() {
        let repo = init_repo();
        let dir = repo.path();
        fs::write(dir.join("README.md"), "wip\n").unwrap();

        let committer = CodeCommitter::new(
            vec![result_with_diff("T1", "Add file", Some(new_file_diff("d.txt")))],
            dir,
            CommitterOptions {
                auto_commit: true,
                ..CommitterOptions::default()
            },
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.successful_tasks, 1);
        let last = run_git(dir, &["log", "--format=%s", "-n", "1"]).unwrap();
        assert_eq!(last, "WIP auto-commit");
        assert_eq!(fs::read_to_string(dir.join("README.md")).unwrap(), "wip\n");
    }

    #[test]
    fn ignore_untracked_leaves_stray_files_alone() {
        let repo = init_repo();
        let dir = repo.path();
        fs::write(dir.join("scratch.txt"), "notes\n").unwrap();

        let committer = CodeCommitter::new(
            vec![result_with_diff("T1", "Edit", Some(edit_readme_diff()))],
            dir,
            CommitterOptions {
                ignore_untracked: true,
                ..CommitterOptions::default()
            },
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.successful_tasks, 1);
        assert_eq!(fs::read_to_string(dir.join("scratch.txt")).unwrap(), "notes\n");
    }

    // ── Failure isolation ─────────────────────────────────────────────────

    #[test]
    fn apply_failure_is_isolated_and_its_branch_removed() {
        let repo = init_repo();
        let dir = repo.path();
        let original = git::head_commit(dir).unwrap();

        let bogus = "--- a/missing.txt\n+++ b/missing.txt\n@@ -1 +1 @@\n-x\n+y\n".to_string();
        let committer = CodeCommitter::new(
            vec![
                result_with_diff("T1", "Bogus", Some(bogus)),
                result_with_diff("T2", "Good", Some(edit_readme_diff())),
            ],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();

        assert_eq!(summary.successful_tasks, 1);
        assert_eq!(summary.failed_tasks, 1);
        assert!(summary.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("applying diff"));
        assert!(summary.results[1].success);

        // Only the good result's branch survives.
        let branches = task_branches(dir);
        assert_eq!(branches.len(), 1);
        assert!(branches[0].starts_with("task-T2-"));
        assert_eq!(git::head_commit(dir).unwrap(), original);
        assert!(git::is_clean(dir, false).unwrap());
    }

    // ── Safety options ────────────────────────────────────────────────────

    #[test]
    fn backup_branch_points_at_the_original_commit() {
        let repo = init_repo();
        let dir = repo.path();
        let original = git::head_commit(dir).unwrap();

        let committer = CodeCommitter::new(
            vec![result_with_diff("T1", "Edit", Some(edit_readme_diff()))],
            dir,
            CommitterOptions {
                backup_branch: Some("fsc-backup".to_string()),
                ..CommitterOptions::default()
            },
        );
        committer.commit_all_changes().unwrap();

        let backup = git::local_branches(dir)
            .unwrap()
            .into_iter()
            .find(|b| b.starts_with("fsc-backup-"))
            .expect("backup branch exists");
        assert_eq!(run_git(dir, &["rev-parse", &backup]).unwrap(), original);
    }

    #[test]
    fn second_committer_on_the_same_tree_fails_fast() {
        let repo = init_repo();
        let dir = repo.path();
        let _held = CommitterLock::acquire(dir).unwrap();

        let committer = CodeCommitter::new(
            vec![result_with_diff("T1", "Edit", Some(edit_readme_diff()))],
            dir,
            CommitterOptions::default(),
        );
        let err = committer.commit_all_changes().unwrap_err();
        assert!(err.to_string().contains("another committer"));
        assert!(task_branches(dir).is_empty());
    }

    // ── Reporting ─────────────────────────────────────────────────────────

    #[test]
    fn rendered_report_lists_every_result() {
        let repo = init_repo();
        let dir = repo.path();

        let committer = CodeCommitter::new(
            vec![
                result_with_diff("T1", "Good", Some(edit_readme_diff())),
                result_with_diff(
                    "T2",
                    "Bad",
                    Some("--- a/nope\n+++ b/nope\n@@ -1 +1 @@\n-x\n+y\n".to_string()),
                ),
            ],
            dir,
            CommitterOptions::default(),
        );
        let summary = committer.commit_all_changes().unwrap();

        let mut rendered = Vec::new();
        committer.render_report(&summary, &mut rendered).unwrap();
        let text = String::from_utf8(rendered).unwrap();

        assert!(text.contains("2 task(s): 1 committed, 1 failed"));
        assert!(text.contains("✓ T1 task-T1-"));
        assert!(text.contains("✗ T2 - -"));
        assert!(text.contains("applying diff"));
    }
}
