//! Long-running service facade: submit a job, poll its progress, fetch its
//! final report.
//!
//! The HTTP surface is a thin routing layer over this type. Each submitted
//! job executes on its own background thread; progress reads come from the
//! persisted `JobState` (the authoritative record), so they work from any
//! thread at any time, including after the worker finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::job::analyzer::Analyzer;
use crate::job::orchestrator::{JobOrchestrator, SolverProvider};
use crate::job::{AnalyzerProgress, JobInput, JobState, JobStatus, SolverProgress};
use crate::persist::HistoryPage;
use crate::task::TaskResult;

/// Poll-friendly projection of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub id: String,
    pub status: JobStatus,
    pub analyzer: AnalyzerProgress,
    pub solver: SolverProgress,
    pub updated_at: DateTime<Utc>,
}

impl From<JobState> for JobProgress {
    fn from(job: JobState) -> Self {
        Self {
            id: job.id,
            status: job.status,
            analyzer: job.analyzer_progress,
            solver: job.solver_progress,
            updated_at: job.updated_at,
        }
    }
}

/// A job's terminal report: the full state plus the per-task results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TaskResult>>,
}

/// Owns an orchestrator and runs submitted jobs on background threads.
pub struct JobService<A: Analyzer + 'static, P: SolverProvider + 'static> {
    orchestrator: Arc<JobOrchestrator<A, P>>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<A: Analyzer + 'static, P: SolverProvider + 'static> JobService<A, P> {
    pub fn new(orchestrator: JobOrchestrator<A, P>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator<A, P> {
        &self.orchestrator
    }

    /// Submit a job and start executing it in the background. Returns the
    /// initial `Pending` state immediately.
    pub fn submit(&self, input: JobInput) -> Result<JobState> {
        let job = self.orchestrator.submit(input)?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let id = job.id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("fsc-job-{id}"))
            .spawn(move || {
                // Failures are already recorded in the persisted JobState.
                let _ = orchestrator.execute_job(&id);
            })
            .map_err(|e| Error::infra(format!("failed to spawn job thread: {e}")))?;

        self.workers
            .lock()
            .expect("service workers poisoned")
            .insert(job.id.clone(), handle);
        Ok(job)
    }

    /// Current progress of a job, from the persisted record.
    pub fn progress(&self, id: &str) -> Result<Option<JobProgress>> {
        Ok(self
            .orchestrator
            .persistence()
            .load_job(id)?
            .map(JobProgress::from))
    }

    /// The job's state and results. Results are present once the solver
    /// stage has finished (including cancelled runs).
    pub fn report(&self, id: &str) -> Result<Option<JobReport>> {
        let persistence = self.orchestrator.persistence();
        let Some(job) = persistence.load_job(id)? else {
            return Ok(None);
        };
        let results = persistence.load_results(id)?;
        Ok(Some(JobReport { job, results }))
    }

    /// Cooperatively cancel a running job.
    pub fn stop(&self, id: &str) -> bool {
        self.orchestrator.stop_job(id)
    }

    /// Paginated job history.
    pub fn history(&self, limit: usize, offset: usize) -> Result<HistoryPage> {
        self.orchestrator.persistence().history(limit, offset)
    }

    /// Block until a job's worker thread has finished. Returns whether a
    /// worker existed for the id.
    pub fn wait(&self, id: &str) -> bool {
        let handle = self
            .workers
            .lock()
            .expect("service workers poisoned")
            .remove(id);
        match handle {
            Some(handle) => {
                let _ = handle.join();
                true
            }
            None => false,
        }
    }

    /// Join every outstanding worker. Called on shutdown.
    pub fn drain(&self) {
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().expect("service workers poisoned");
            workers.drain().collect()
        };
        for (_, handle) in handles {
            let _ = handle.join();
        }
    }
}

impl<A: Analyzer + 'static, P: SolverProvider + 'static> Drop for JobService<A, P> {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::git::run_git;
    use crate::config::Config;
    use crate::job::orchestrator::OrchestratorOptions;
    use crate::persist::TaskPersistence;
    use crate::solver::SolveTask;
    use crate::store::StateStore;
    use crate::task::{Task, TaskStatus};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct MockAnalyzer {
        tasks: Vec<Task>,
    }

    impl Analyzer for MockAnalyzer {
        fn analyze(&self, _workspace: &Path, _config: &Config) -> Result<Vec<Task>> {
            Ok(self.tasks.clone())
        }
    }

    struct ScriptedSolver {
        delay: Duration,
    }

    impl SolveTask for ScriptedSolver {
        fn solve_task(&self, task: &Task) -> TaskResult {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let mut result = TaskResult::new(task, TaskStatus::Success, "done");
            result.completed_at = Some(Utc::now().timestamp_millis());
            result.git_diff = Some(format!(
                "--- /dev/null\n+++ b/{id}.txt\n@@ -0,0 +1 @@\n+{id}\n",
                id = task.id
            ));
            result
        }
    }

    struct ScriptedProvider {
        delay: Duration,
    }

    impl SolverProvider for ScriptedProvider {
        type Solver = ScriptedSolver;

        fn solver_for(&self, _config: &Config, _repo_url: &str) -> ScriptedSolver {
            ScriptedSolver { delay: self.delay }
        }
    }

    fn seed_repo(dir: &Path) {
        run_git(dir, &["init", "-q", "-b", "main"]).unwrap();
        run_git(dir, &["config", "user.name", "test"]).unwrap();
        run_git(dir, &["config", "user.email", "test@localhost"]).unwrap();
        std::fs::write(dir.join("README.md"), "seed\n").unwrap();
        run_git(dir, &["add", "."]).unwrap();
        run_git(dir, &["commit", "-q", "-m", "initial"]).unwrap();
    }

    fn service(
        storage: &Path,
        task_count: usize,
        delay: Duration,
    ) -> JobService<MockAnalyzer, ScriptedProvider> {
        let tasks = (0..task_count)
            .map(|i| Task {
                id: format!("T{i}"),
                title: format!("task {i}"),
                description: String::new(),
                priority: 1,
            })
            .collect();
        JobService::new(JobOrchestrator::new(
            Config::default(),
            TaskPersistence::new(storage).unwrap(),
            Arc::new(StateStore::new()),
            MockAnalyzer { tasks },
            ScriptedProvider { delay },
            OrchestratorOptions {
                monitor_tick: Duration::from_millis(20),
                ..OrchestratorOptions::default()
            },
        ))
    }

    fn cleanup_workspace(job_id: &str) {
        let _ = std::fs::remove_dir_all(crate::job::workspace::workspace_dir(job_id));
    }

    #[test]
    fn submit_returns_immediately_and_progress_converges() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let service = service(storage.path(), 2, Duration::from_millis(30));
        let job = service
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        assert!(service.wait(&job.id));
        let progress = service.progress(&job.id).unwrap().unwrap();
        assert_eq!(progress.status, JobStatus::Completed);
        assert_eq!(progress.solver.percent, 100);
        assert_eq!(progress.solver.completed_tasks, 2);

        let report = service.report(&job.id).unwrap().unwrap();
        assert_eq!(report.results.unwrap().len(), 2);
        assert!(report.job.final_report.is_some());

        let history = service.history(10, 0).unwrap();
        assert_eq!(history.total_count, 1);
        cleanup_workspace(&job.id);
    }

    #[test]
    fn progress_of_unknown_job_is_none() {
        let storage = TempDir::new().unwrap();
        let service = service(storage.path(), 1, Duration::ZERO);
        assert!(service.progress("job-nope").unwrap().is_none());
        assert!(service.report("job-nope").unwrap().is_none());
        assert!(!service.wait("job-nope"));
    }

    #[test]
    fn stop_cancels_a_background_job() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let service = service(storage.path(), 5, Duration::from_millis(250));
        let job = service
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();

        // Wait for the run to reach the solver, then cancel.
        std::thread::sleep(Duration::from_millis(120));
        assert!(service.stop(&job.id));
        assert!(service.wait(&job.id));

        let progress = service.progress(&job.id).unwrap().unwrap();
        assert_eq!(progress.status, JobStatus::Failed);
        assert_eq!(progress.solver.error.as_deref(), Some("cancelled"));
        cleanup_workspace(&job.id);
    }

    #[test]
    fn drain_joins_all_workers() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let service = service(storage.path(), 1, Duration::from_millis(50));
        let a = service
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();
        let b = service
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();

        service.drain();
        for id in [&a.id, &b.id] {
            let progress = service.progress(id).unwrap().unwrap();
            assert!(progress.status.is_terminal());
            cleanup_workspace(id);
        }
    }
}
