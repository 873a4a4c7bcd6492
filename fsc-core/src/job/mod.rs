//! Job state: the input descriptor, the lifecycle state machine, and the
//! progress records published while a job runs.
//!
//! A `JobState` is owned and mutated only by the orchestrator driving it;
//! everyone else sees persisted snapshots (disk) or derived copies (state
//! store). Status transitions are monotonic (a job never returns to a prior
//! status) and `Failed` is reachable from any non-terminal state.

pub mod analyzer;
pub mod orchestrator;
pub mod service;
pub mod workspace;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::task::{Task, TaskResult};

/// Where a job's repository comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInputKind {
    GithubUrl,
    GitUrl,
    LocalPath,
}

impl JobInputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GithubUrl => "github_url",
            Self::GitUrl => "git_url",
            Self::LocalPath => "local_path",
        }
    }
}

fn github_https_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^https://github\.com/[^/]+/[^/]+(\.git)?$").expect("valid regex")
    })
}

fn github_ssh_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^git@github\.com:[^/]+/[^/]+(\.git)?$").expect("valid regex")
    })
}

/// The request that created a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub kind: JobInputKind,
    pub url: String,
    /// Per-job config overrides, applied through [`Config::apply_entry`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_overrides: Option<BTreeMap<String, String>>,
}

impl JobInput {
    pub fn github(url: impl Into<String>) -> Self {
        Self {
            kind: JobInputKind::GithubUrl,
            url: url.into(),
            config_overrides: None,
        }
    }

    pub fn git(url: impl Into<String>) -> Self {
        Self {
            kind: JobInputKind::GitUrl,
            url: url.into(),
            config_overrides: None,
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: JobInputKind::LocalPath,
            url: path.into(),
            config_overrides: None,
        }
    }

    /// Validate the input against its kind and the config's access policy.
    pub fn validate(&self, config: &Config) -> Result<()> {
        match self.kind {
            JobInputKind::GithubUrl => {
                if !github_https_re().is_match(&self.url) {
                    return Err(Error::config(format!(
                        "not a GitHub HTTPS repository URL: {}",
                        self.url
                    )));
                }
            }
            JobInputKind::GitUrl => {
                if github_ssh_re().is_match(&self.url) || github_https_re().is_match(&self.url) {
                    return Ok(());
                }
                // Other remotes: HTTPS is always acceptable; anything else
                // only when the config opts into SSH access.
                if self.url.starts_with("https://") {
                    return Ok(());
                }
                if !config.use_github_ssh {
                    return Err(Error::config(format!(
                        "non-HTTPS git remote requires use_github_ssh: {}",
                        self.url
                    )));
                }
            }
            JobInputKind::LocalPath => {
                if !Path::new(&self.url).is_dir() {
                    return Err(Error::config(format!(
                        "local path is not an existing directory: {}",
                        self.url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Analyzed,
    Executing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Analyzing => 1,
            Self::Analyzed => 2,
            Self::Executing => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one pipeline stage (analyzer or solver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Progress of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerProgress {
    pub status: StageStatus,
    /// Integer percent, 0–100.
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for AnalyzerProgress {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            percent: 0,
            current_step: None,
            total_steps: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Progress of the solver stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverProgress {
    pub status: StageStatus,
    /// Integer percent, 0–100.
    pub percent: u8,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for SolverProgress {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            percent: 0,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            current_task: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Final accounting for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub summary: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub duration_ms: i64,
}

/// The full state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub id: String,
    pub input: JobInput,
    pub status: JobStatus,
    pub analyzer_progress: AnalyzerProgress,
    pub solver_progress: SolverProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TaskResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<FinalReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(id: impl Into<String>, input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            input,
            status: JobStatus::Pending,
            analyzer_progress: AnalyzerProgress::default(),
            solver_progress: SolverProgress::default(),
            tasks: None,
            results: None,
            final_report: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to the next status. Regressions and transitions out of a
    /// terminal state are rejected; `Failed` is reachable from any
    /// non-terminal state.
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        let valid = if next == JobStatus::Failed {
            !self.status.is_terminal()
        } else {
            next.rank() == self.status.rank() + 1
        };
        if !valid {
            return Err(Error::state(format!(
                "invalid job transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `Failed`, recording the error on the stage that was
    /// running when things went wrong.
    pub fn mark_failed(&mut self, error: &str) {
        if self.status.is_terminal() {
            return;
        }
        match self.status {
            JobStatus::Pending | JobStatus::Analyzing => {
                self.analyzer_progress.status = StageStatus::Failed;
                self.analyzer_progress.error = Some(error.to_string());
            }
            _ => {
                self.solver_progress.status = StageStatus::Failed;
                self.solver_progress.error = Some(error.to_string());
            }
        }
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
    }
}
