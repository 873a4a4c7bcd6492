//! Structured per-job progress events (NDJSON).
//!
//! Each job appends lifecycle events to `<storage_root>/events/<jobId>.ndjson`.
//! Pollers and log tooling tail this file for real-time progress without
//! having to diff whole `JobState` snapshots. Emission never fails the
//! pipeline: IO errors are logged and swallowed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Known event types emitted during a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Submitted,
    Analyzing,
    Analyzed,
    Executing,
    TaskFinished,
    Committing,
    Completed,
    Failed,
    Cancelled,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::Executing => "executing",
            Self::TaskFinished => "task_finished",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One line in a job's event file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub at: DateTime<Utc>,
    pub event: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
}

/// Append-only writer for one job's events.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open the event log for a job, creating the events directory.
    pub fn open(storage_root: &Path, job_id: &str) -> Self {
        let dir = storage_root.join("events");
        if let Err(e) = fs::create_dir_all(&dir) {
            log::warn!("failed to create events dir {}: {e}", dir.display());
        }
        Self {
            path: dir.join(format!("{job_id}.ndjson")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. IO problems are logged, never propagated.
    pub fn emit(&self, event: EventType, task_id: Option<&str>, message: &str) {
        let entry = JobEvent {
            at: Utc::now(),
            event,
            task_id: task_id.map(|s| s.to_string()),
            message: message.to_string(),
        };
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match file {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    log::warn!("failed to append event to {}: {e}", self.path.display());
                }
            }
            Err(e) => log::warn!("failed to open {}: {e}", self.path.display()),
        }
    }
}

/// Read all events for a job. Unparseable lines are skipped; a missing file
/// reads as no events.
pub fn read_events(storage_root: &Path, job_id: &str) -> Vec<JobEvent> {
    let path = storage_root
        .join("events")
        .join(format!("{job_id}.ndjson"));
    let Ok(content) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// The most recent event for a job, if any.
pub fn last_event(storage_root: &Path, job_id: &str) -> Option<JobEvent> {
    read_events(storage_root, job_id).into_iter().last()
}
