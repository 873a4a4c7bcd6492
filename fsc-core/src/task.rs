//! Task and task-result types shared by every pipeline stage.
//!
//! A `Task` is produced by the analysis stage and never mutated afterwards.
//! A `TaskResult` is produced exactly once by a task solver when the task
//! reaches a terminal status, and is handed to the committer by value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work produced by analysis, consumed by one task solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within a job.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Higher is more urgent.
    pub priority: i32,
}

/// Terminal and in-flight states of a task.
///
/// Transitions are monotonic: `NotStarted → Ongoing → {Success, Failure, Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Ongoing,
    Success,
    Failure,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Ongoing => "ongoing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "ongoing" => Some(Self::Ongoing),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Glyph used in commit messages and list views.
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Success => "✓",
            _ => "✗",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task plus its terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub status: TaskStatus,
    /// Free-form report text from the agent (or the captured error).
    pub report: String,
    /// Completion wall-clock time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Unified-diff text; set only for successful tasks that changed files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_diff: Option<String>,
}

impl TaskResult {
    /// Build a result carrying the task's descriptive fields and a status.
    pub fn new(task: &Task, status: TaskStatus, report: impl Into<String>) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status,
            report: report.into(),
            completed_at: None,
            git_diff: None,
        }
    }

    /// A failure result with the given report text.
    pub fn failure(task: &Task, report: impl Into<String>) -> Self {
        Self::new(task, TaskStatus::Failure, report)
    }

    /// Whether this result carries a non-empty diff to integrate.
    pub fn has_diff(&self) -> bool {
        self.git_diff
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}
