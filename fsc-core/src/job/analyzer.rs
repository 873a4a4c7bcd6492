//! Port to the codebase-analysis stage.
//!
//! Analysis is an external collaborator: given a prepared workspace and the
//! job's config, it returns the task descriptors to execute. The crate only
//! fixes the contract and ships a file-backed adapter; tests use mocks.

use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::task::Task;

/// Port for the analysis stage.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, workspace: &Path, config: &Config) -> Result<Vec<Task>>;
}

/// Adapter that reads a `Task[]` JSON document from a fixed file.
///
/// Useful for the CLI and for driving the pipeline with a pre-computed plan.
pub struct TaskListFile {
    path: std::path::PathBuf,
}

impl TaskListFile {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Analyzer for TaskListFile {
    fn analyze(&self, _workspace: &Path, _config: &Config) -> Result<Vec<Task>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::analysis(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::analysis(format!("{}: {e}", self.path.display())))
    }
}

/// Check an analyzer's output against the config's task-count bounds and
/// drop excess tasks, lowest priority first.
pub fn check_task_count(mut tasks: Vec<Task>, config: &Config) -> Result<Vec<Task>> {
    if tasks.is_empty() {
        return Err(Error::analysis("analysis returned no tasks"));
    }
    if tasks.len() < config.min_tasks {
        return Err(Error::analysis(format!(
            "analysis returned {} task(s), minimum is {}",
            tasks.len(),
            config.min_tasks
        )));
    }
    if tasks.len() > config.max_tasks {
        log::warn!(
            "analysis returned {} tasks, keeping the {} highest-priority",
            tasks.len(),
            config.max_tasks
        );
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        tasks.truncate(config.max_tasks);
    }
    Ok(tasks)
}
