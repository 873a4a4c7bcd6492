//! The job orchestrator: drives one job through its lifecycle and publishes
//! progress.
//!
//! `Pending → Analyzing → Analyzed → Executing → Completed`, with `Failed`
//! reachable from every live state. The orchestrator owns its `JobState`
//! exclusively: disk (persistence) is the authoritative record, the state
//! store carries a derived copy under `task:<id>*` keys for concurrent
//! readers. Progress is persisted on every status transition and whenever
//! the solver percent has moved at least five points since the last write.
//!
//! The solver pool runs on a scoped thread while the calling thread acts as
//! the progress monitor, waking on the pool's done-signal or a fixed tick;
//! there is no iteration bound to guess.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::committer::{CodeCommitter, CommitterOptions};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventLog, EventType};
use crate::job::analyzer::{self, Analyzer};
use crate::job::workspace::Workspace;
use crate::job::{FinalReport, JobInput, JobState, JobStatus, StageStatus};
use crate::persist::TaskPersistence;
use crate::runner::{ContainerGate, DockerRunnerFactory};
use crate::solver::{SolveTask, SolverPool, TaskSolver};
use crate::store::{EntryMetadata, SetOptions, StateStore, StateValue};
use crate::task::{TaskResult, TaskStatus};

/// Port for building the per-job task solver.
pub trait SolverProvider: Send + Sync {
    type Solver: SolveTask;

    fn solver_for(&self, config: &Config, repo_url: &str) -> Self::Solver;
}

/// Production provider: docker-backed solvers sharing one container gate.
pub struct DockerSolverProvider {
    gate: Arc<ContainerGate>,
}

impl DockerSolverProvider {
    pub fn new(gate: Arc<ContainerGate>) -> Self {
        Self { gate }
    }
}

impl SolverProvider for DockerSolverProvider {
    type Solver = TaskSolver<DockerRunnerFactory>;

    fn solver_for(&self, config: &Config, repo_url: &str) -> Self::Solver {
        let factory = DockerRunnerFactory::from_config(config, Arc::clone(&self.gate));
        TaskSolver::new(factory, config.clone(), repo_url)
    }
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Progress monitor tick while the pool runs.
    pub monitor_tick: Duration,
    /// Options handed to the code committer.
    pub committer: CommitterOptions,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            monitor_tick: Duration::from_secs(2),
            committer: CommitterOptions::default(),
        }
    }
}

/// Persist progress only when it moved enough to matter.
struct ProgressGate {
    last_percent: u8,
}

impl ProgressGate {
    fn new(percent: u8) -> Self {
        Self {
            last_percent: percent,
        }
    }

    fn should_persist(&mut self, percent: u8) -> bool {
        if percent.abs_diff(self.last_percent) >= 5 {
            self.last_percent = percent;
            return true;
        }
        false
    }
}

/// Drives jobs end to end.
pub struct JobOrchestrator<A: Analyzer, P: SolverProvider> {
    config: Config,
    persistence: TaskPersistence,
    store: Arc<StateStore>,
    analyzer: A,
    provider: P,
    options: OrchestratorOptions,
    /// Cancellation signals for jobs currently executing in this process.
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl<A: Analyzer, P: SolverProvider> JobOrchestrator<A, P> {
    pub fn new(
        config: Config,
        persistence: TaskPersistence,
        store: Arc<StateStore>,
        analyzer: A,
        provider: P,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            config,
            persistence,
            store,
            analyzer,
            provider,
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Access the underlying persistence (useful for inspection and the
    /// service layer).
    pub fn persistence(&self) -> &TaskPersistence {
        &self.persistence
    }

    /// Access the underlying state store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Validate an input and persist a new `Pending` job for it.
    pub fn submit(&self, input: JobInput) -> Result<JobState> {
        let config = self.effective_config(&input)?;
        input.validate(&config)?;
        let job = self.persistence.create_job(input)?;
        self.publish(&job);
        self.events(&job.id)
            .emit(EventType::Submitted, None, &format!("job submitted for {}", job.input.url));
        log::info!("job {} submitted ({})", job.id, job.input.url);
        Ok(job)
    }

    /// Submit and execute a job for a GitHub repository URL.
    pub fn run_github_job(&self, url: &str) -> Result<JobState> {
        let job = self.submit(JobInput::github(url))?;
        self.execute_job(&job.id)
    }

    /// Signal a running job to stop. Returns whether the job was executing.
    pub fn stop_job(&self, id: &str) -> bool {
        let active = self.active.lock().expect("active map poisoned");
        match active.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                log::info!("job {id}: cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Run a submitted job to its terminal state.
    ///
    /// Every failure is recorded in the persisted `JobState` before the
    /// error is returned; re-entry for an id already executing in this
    /// process is refused.
    pub fn execute_job(&self, id: &str) -> Result<JobState> {
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.active.lock().expect("active map poisoned");
            if active.contains_key(id) {
                return Err(Error::state(format!("job {id} is already executing")));
            }
            active.insert(id.to_string(), Arc::clone(&cancel));
        }

        let outcome = self.run_pipeline(id, &cancel);
        self.active
            .lock()
            .expect("active map poisoned")
            .remove(id);

        match outcome {
            Ok(job) => Ok(job),
            Err(e) => {
                let message = e.to_string();
                log::warn!("job {id} failed: {message}");
                let kind = if matches!(e, Error::Cancelled) {
                    EventType::Cancelled
                } else {
                    EventType::Failed
                };
                self.events(id).emit(kind, None, &message);
                if let Ok(Some(job)) = self
                    .persistence
                    .update_job(id, |job| job.mark_failed(&message))
                {
                    self.publish(&job);
                }
                Err(e)
            }
        }
    }

    fn events(&self, job_id: &str) -> EventLog {
        EventLog::open(self.persistence.root(), job_id)
    }

    /// Per-job config: base config plus the input's overrides.
    fn effective_config(&self, input: &JobInput) -> Result<Config> {
        let mut config = self.config.clone();
        if let Some(overrides) = &input.config_overrides {
            for (key, value) in overrides {
                config.apply_entry(key, value);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn run_pipeline(&self, id: &str, cancel: &Arc<AtomicBool>) -> Result<JobState> {
        let mut job = self
            .persistence
            .load_job(id)?
            .ok_or_else(|| Error::state(format!("unknown job {id}")))?;
        if job.status != JobStatus::Pending {
            return Err(Error::state(format!(
                "job {id} already ran (status {})",
                job.status
            )));
        }
        let config = self.effective_config(&job.input)?;
        job.input.validate(&config)?;

        job.advance(JobStatus::Analyzing)?;
        job.analyzer_progress.status = StageStatus::Running;
        job.analyzer_progress.started_at = Some(Utc::now());
        job.analyzer_progress.percent = 10;
        job.analyzer_progress.current_step = Some("preparing workspace".to_string());
        self.save_and_publish(&mut job)?;

        let workspace = Workspace::prepare(&job.input, &job.id)?;
        match self.run_in_workspace(&mut job, &config, &workspace, cancel) {
            Ok(()) => {
                workspace.cleanup_on_success();
                Ok(job)
            }
            Err(e) => {
                workspace.cleanup_on_failure();
                Err(e)
            }
        }
    }

    fn run_in_workspace(
        &self,
        job: &mut JobState,
        config: &Config,
        workspace: &Workspace,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        let events = self.events(&job.id);

        // ── Analysis ──────────────────────────────────────────────────────
        job.analyzer_progress.percent = 30;
        job.analyzer_progress.current_step = Some("analyzing codebase".to_string());
        self.save_and_publish(job)?;
        events.emit(EventType::Analyzing, None, "analyzing codebase");

        let tasks = self.analyzer.analyze(workspace.path(), config)?;
        let tasks = analyzer::check_task_count(tasks, config)?;
        log::info!("job {}: analysis produced {} task(s)", job.id, tasks.len());

        job.analyzer_progress.status = StageStatus::Completed;
        job.analyzer_progress.percent = 100;
        job.analyzer_progress.current_step = None;
        job.analyzer_progress.completed_at = Some(Utc::now());
        job.tasks = Some(tasks.clone());
        job.solver_progress.total_tasks = tasks.len();
        job.advance(JobStatus::Analyzed)?;
        self.save_and_publish(job)?;
        events.emit(
            EventType::Analyzed,
            None,
            &format!("analysis produced {} task(s)", tasks.len()),
        );

        // ── Execution ─────────────────────────────────────────────────────
        job.advance(JobStatus::Executing)?;
        job.solver_progress.status = StageStatus::Running;
        job.solver_progress.started_at = Some(Utc::now());
        self.save_and_publish(job)?;
        events.emit(EventType::Executing, None, "dispatching tasks");

        let solver = self.provider.solver_for(config, &job.input.url);
        let pool = SolverPool::new(solver, config.max_parallel_docker_containers);
        for task in tasks {
            pool.add_task(task);
        }

        let results = self.drive_pool(job, &pool, &events, cancel)?;
        job.results = Some(results.clone());
        self.persistence.save_results(&job.id, &results)?;

        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        // ── Commit ────────────────────────────────────────────────────────
        job.solver_progress.percent = 90;
        job.solver_progress.current_task = None;
        self.save_and_publish(job)?;
        events.emit(EventType::Committing, None, "integrating task results");

        let committer =
            CodeCommitter::new(results.clone(), workspace.path(), self.options.committer.clone());
        let summary = committer.commit_all_changes()?;
        let mut rendered = Vec::new();
        if committer.render_report(&summary, &mut rendered).is_ok() {
            log::info!("{}", String::from_utf8_lossy(&rendered));
        }

        // ── Finalize ──────────────────────────────────────────────────────
        let completed = results
            .iter()
            .filter(|r| r.status != TaskStatus::Failure)
            .count();
        let failed = results.len() - completed;
        job.solver_progress.percent = 100;
        job.solver_progress.status = StageStatus::Completed;
        job.solver_progress.completed_tasks = completed;
        job.solver_progress.failed_tasks = failed;
        job.solver_progress.completed_at = Some(Utc::now());
        job.final_report = Some(FinalReport {
            summary: format!(
                "{} task(s): {} completed, {} failed; {} branch(es) created",
                results.len(),
                completed,
                failed,
                summary.successful_tasks
            ),
            total_tasks: results.len(),
            completed_tasks: completed,
            failed_tasks: failed,
            duration_ms: (Utc::now() - job.created_at).num_milliseconds(),
        });
        job.advance(JobStatus::Completed)?;
        self.save_and_publish(job)?;
        if let Some(report) = &job.final_report {
            events.emit(EventType::Completed, None, &report.summary);
        }
        log::info!("job {} completed", job.id);
        Ok(())
    }

    /// Run the pool on a scoped thread while this thread republishes
    /// progress on every tick or done-signal.
    fn drive_pool<S: SolveTask>(
        &self,
        job: &mut JobState,
        pool: &SolverPool<S>,
        events: &EventLog,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Vec<TaskResult>> {
        let mut gate = ProgressGate::new(job.solver_progress.percent);
        let mut seen = 0usize;
        std::thread::scope(|scope| -> Result<()> {
            let handle = scope.spawn(|| pool.start());

            loop {
                let finished = pool.wait_done(self.options.monitor_tick);
                if cancel.load(Ordering::SeqCst) && !pool.is_cancelled() {
                    pool.stop();
                }

                let counts = pool.counts();
                let done = counts.completed + counts.failed;
                if done > seen {
                    seen = done;
                    events.emit(
                        EventType::TaskFinished,
                        None,
                        &format!("{done}/{} task(s) finished", counts.total),
                    );
                }
                job.solver_progress.completed_tasks = counts.completed;
                job.solver_progress.failed_tasks = counts.failed;
                job.solver_progress.current_task = pool.current_task();
                if counts.total > 0 {
                    job.solver_progress.percent = (80 * done / counts.total) as u8;
                }

                self.publish(job);
                if gate.should_persist(job.solver_progress.percent) {
                    job.updated_at = Utc::now();
                    self.persistence.save_job(job)?;
                }
                if finished {
                    break;
                }
            }

            let _ = handle.join();
            Ok(())
        })?;
        Ok(pool.reports())
    }

    fn save_and_publish(&self, job: &mut JobState) -> Result<()> {
        job.updated_at = Utc::now();
        self.persistence.save_job(job)?;
        self.publish(job);
        Ok(())
    }

    /// Republish the job's derived view into the state store.
    fn publish(&self, job: &JobState) {
        let options = || SetOptions {
            ttl_seconds: None,
            metadata: Some(EntryMetadata {
                category: Some("jobs".to_string()),
                tags: vec![job.input.kind.as_str().to_string()],
                persistent: false,
                description: None,
            }),
        };
        let object = |value: serde_json::Result<serde_json::Value>| {
            StateValue::Object(value.unwrap_or(serde_json::Value::Null))
        };

        self.store.set(
            &format!("task:{}", job.id),
            object(serde_json::to_value(job)),
            options(),
        );
        self.store.set(
            &format!("task:{}:status", job.id),
            StateValue::String(job.status.as_str().to_string()),
            options(),
        );
        self.store.set(
            &format!("task:{}:analyzer", job.id),
            object(serde_json::to_value(&job.analyzer_progress)),
            options(),
        );
        self.store.set(
            &format!("task:{}:solver", job.id),
            object(serde_json::to_value(&job.solver_progress)),
            options(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::git::run_git;
    use crate::task::Task;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    // ── Mock analyzer ─────────────────────────────────────────────────────

    struct MockAnalyzer {
        tasks: Vec<Task>,
    }

    impl Analyzer for MockAnalyzer {
        fn analyze(&self, workspace: &Path, _config: &Config) -> Result<Vec<Task>> {
            assert!(workspace.is_dir());
            Ok(self.tasks.clone())
        }
    }

    // ── Scripted solver provider ──────────────────────────────────────────

    struct ScriptedSolver {
        delay: Duration,
    }

    impl SolveTask for ScriptedSolver {
        fn solve_task(&self, task: &Task) -> TaskResult {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let mut result = TaskResult::new(task, TaskStatus::Success, "scripted");
            result.completed_at = Some(Utc::now().timestamp_millis());
            result.git_diff = Some(format!(
                "--- /dev/null\n+++ b/{id}.txt\n@@ -0,0 +1 @@\n+made by {id}\n",
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

    // ── Fixtures ──────────────────────────────────────────────────────────

    fn seed_repo(dir: &Path) {
        run_git(dir, &["init", "-q", "-b", "main"]).unwrap();
        run_git(dir, &["config", "user.name", "test"]).unwrap();
        run_git(dir, &["config", "user.email", "test@localhost"]).unwrap();
        fs::write(dir.join("README.md"), "seed\n").unwrap();
        run_git(dir, &["add", "."]).unwrap();
        run_git(dir, &["commit", "-q", "-m", "initial"]).unwrap();
    }

    fn task(id: &str, priority: i32) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            description: format!("description {id}"),
            priority,
        }
    }

    fn orchestrator(
        storage: &Path,
        tasks: Vec<Task>,
        delay: Duration,
    ) -> JobOrchestrator<MockAnalyzer, ScriptedProvider> {
        let mut config = Config::default();
        config.max_parallel_docker_containers = 2;
        JobOrchestrator::new(
            config,
            TaskPersistence::new(storage).unwrap(),
            Arc::new(StateStore::new()),
            MockAnalyzer { tasks },
            ScriptedProvider { delay },
            OrchestratorOptions {
                monitor_tick: Duration::from_millis(20),
                committer: CommitterOptions::default(),
            },
        )
    }

    fn cleanup_workspace(job_id: &str) {
        let _ = fs::remove_dir_all(crate::job::workspace::workspace_dir(job_id));
    }

    // ── Happy path ────────────────────────────────────────────────────────

    #[test]
    fn happy_path_completes_with_branches_and_report() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let orch = orchestrator(
            storage.path(),
            vec![task("T1", 3), task("T2", 1), task("T3", 2)],
            Duration::ZERO,
        );
        let job = orch
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();
        let done = orch.execute_job(&job.id).unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        let results = done.results.as_ref().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(done.solver_progress.percent, 100);
        assert_eq!(done.solver_progress.completed_tasks, 3);
        assert_eq!(done.solver_progress.failed_tasks, 0);

        let report = done.final_report.as_ref().unwrap();
        assert_eq!(report.total_tasks, 3);
        assert_eq!(report.completed_tasks, 3);
        assert_eq!(report.failed_tasks, 0);
        assert!(report.duration_ms >= 0);

        // Local-path workspaces survive with the created branches.
        let workspace = crate::job::workspace::workspace_dir(&job.id);
        let branches = crate::committer::git::local_branches(&workspace).unwrap();
        assert_eq!(
            branches.iter().filter(|b| b.starts_with("task-")).count(),
            3
        );

        // Persistence and the state store both reflect the terminal state.
        let persisted = orch.persistence.load_job(&job.id).unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Completed);
        assert_eq!(orch.persistence.load_results(&job.id).unwrap().unwrap().len(), 3);
        assert_eq!(
            orch.store.get(&format!("task:{}:status", job.id)),
            Some(StateValue::String("completed".to_string()))
        );
        assert!(orch.store.has(&format!("task:{}", job.id)));
        assert!(orch.store.has(&format!("task:{}:analyzer", job.id)));
        assert!(orch.store.has(&format!("task:{}:solver", job.id)));

        // The event trail covers the whole lifecycle.
        let events = crate::events::read_events(storage.path(), &job.id);
        let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
        assert!(kinds.contains(&crate::events::EventType::Submitted));
        assert!(kinds.contains(&crate::events::EventType::Analyzed));
        assert!(kinds.contains(&crate::events::EventType::Executing));
        assert!(kinds.contains(&crate::events::EventType::Committing));
        assert_eq!(kinds.last(), Some(&crate::events::EventType::Completed));

        cleanup_workspace(&job.id);
    }

    // ── Failure paths ─────────────────────────────────────────────────────

    #[test]
    fn empty_analysis_fails_the_job() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let orch = orchestrator(storage.path(), vec![], Duration::ZERO);
        let job = orch
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();
        let err = orch.execute_job(&job.id).unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));

        let persisted = orch.persistence.load_job(&job.id).unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Failed);
        assert_eq!(persisted.analyzer_progress.status, StageStatus::Failed);
        assert!(persisted
            .analyzer_progress
            .error
            .as_deref()
            .unwrap()
            .contains("no tasks"));

        // The workspace was removed on failure.
        assert!(!crate::job::workspace::workspace_dir(&job.id).exists());
    }

    #[test]
    fn submit_rejects_invalid_inputs() {
        let storage = TempDir::new().unwrap();
        let orch = orchestrator(storage.path(), vec![task("T1", 1)], Duration::ZERO);

        let err = orch
            .submit(JobInput::github("https://gitlab.com/o/r"))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = orch
            .submit(JobInput::local("/no/such/directory"))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn submit_rejects_inconsistent_config_overrides() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let orch = orchestrator(storage.path(), vec![task("T1", 1)], Duration::ZERO);
        let mut input = JobInput::local(source.path().display().to_string());
        input.config_overrides = Some(
            [(
                "max_parallel_docker_containers".to_string(),
                "50".to_string(),
            )]
            .into(),
        );
        let err = orch.submit(input).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn execute_refuses_unknown_and_rerun_jobs() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let orch = orchestrator(storage.path(), vec![task("T1", 1)], Duration::ZERO);
        assert!(orch.execute_job("job-unknown").is_err());

        let job = orch
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();
        orch.execute_job(&job.id).unwrap();
        let err = orch.execute_job(&job.id).unwrap_err();
        assert!(err.to_string().contains("already ran"));
        cleanup_workspace(&job.id);
    }

    // ── Cancellation ──────────────────────────────────────────────────────

    #[test]
    fn stop_job_cancels_and_records_the_remainder() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let tasks: Vec<Task> = (0..6).map(|i| task(&format!("T{i}"), 0)).collect();
        let orch = Arc::new(orchestrator(
            storage.path(),
            tasks,
            Duration::from_millis(300),
        ));
        let job = orch
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();

        let runner = {
            let orch = Arc::clone(&orch);
            let id = job.id.clone();
            std::thread::spawn(move || orch.execute_job(&id))
        };
        // Let the first batch get in flight before cancelling.
        std::thread::sleep(Duration::from_millis(120));
        assert!(orch.stop_job(&job.id));
        let err = runner.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let persisted = orch.persistence.load_job(&job.id).unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Failed);
        assert_eq!(
            persisted.solver_progress.error.as_deref(),
            Some("cancelled")
        );

        let last = crate::events::last_event(storage.path(), &job.id).unwrap();
        assert_eq!(last.event, crate::events::EventType::Cancelled);

        let results = orch.persistence.load_results(&job.id).unwrap().unwrap();
        assert_eq!(results.len(), 6);
        let cancelled = results.iter().filter(|r| r.report == "cancelled").count();
        assert!(cancelled >= 2, "expected cancelled results, got {cancelled}");
        // In-flight tasks (at most max_parallel per wave) still finished.
        assert!(results.len() - cancelled <= 4);

        assert!(!orch.stop_job(&job.id));
        cleanup_workspace(&job.id);
    }

    #[test]
    fn duplicate_execution_is_refused_while_running() {
        let storage = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        seed_repo(source.path());

        let orch = Arc::new(orchestrator(
            storage.path(),
            vec![task("T1", 1), task("T2", 1)],
            Duration::from_millis(300),
        ));
        let job = orch
            .submit(JobInput::local(source.path().display().to_string()))
            .unwrap();

        let runner = {
            let orch = Arc::clone(&orch);
            let id = job.id.clone();
            std::thread::spawn(move || orch.execute_job(&id))
        };
        std::thread::sleep(Duration::from_millis(100));
        let err = orch.execute_job(&job.id).unwrap_err();
        assert!(err.to_string().contains("already executing"));

        runner.join().unwrap().unwrap();
        cleanup_workspace(&job.id);
    }
}
