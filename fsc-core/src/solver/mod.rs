//! End-to-end execution of a single task.
//!
//! A [`TaskSolver`] obtains one container runner per task, runs the agent
//! command sequence, parses the structured report, and retrieves the diff
//! for successful tasks. Every failure mode (start failure, non-zero run,
//! timeout, unparseable report, missing diff) terminates in a `Failure`
//! [`TaskResult`]; nothing propagates past the solver, and the runner is
//! shut down on every path.

pub mod pool;
pub mod report;
pub mod script;

pub use pool::{PoolCounts, SolverPool};

use crate::config::Config;
use crate::runner::{ContainerRunner, RunnerFactory};
use crate::task::{Task, TaskResult, TaskStatus};

/// Well-known artifact paths inside the agent container.
const REPORT_PATH: &str = "/app/finalReport.json";
const DIFF_PATH: &str = "/app/git_diff.txt";

/// Port the pool drives: run one task to a terminal result.
pub trait SolveTask: Send + Sync {
    fn solve_task(&self, task: &Task) -> TaskResult;
}

/// Container-backed task solver.
pub struct TaskSolver<F: RunnerFactory> {
    factory: F,
    config: Config,
    repo_url: String,
}

impl<F: RunnerFactory> TaskSolver<F> {
    pub fn new(factory: F, config: Config, repo_url: impl Into<String>) -> Self {
        Self {
            factory,
            config,
            repo_url: repo_url.into(),
        }
    }

    fn drive(&self, runner: &mut F::Runner, task: &Task) -> TaskResult {
        if let Err(e) = runner.start() {
            return TaskResult::failure(task, format!("container start failure: {e}"));
        }

        let commands = script::agent_commands(&self.config, task, &self.repo_url);
        let outcome = match runner.run(&commands, self.config.docker_timeout_seconds) {
            Ok(outcome) => outcome,
            Err(e) => return TaskResult::failure(task, format!("container run failure: {e}")),
        };
        if !outcome.is_success() {
            let mut report = outcome
                .first_error
                .unwrap_or_else(|| "agent command failed".to_string());
            report.push_str("\n\n");
            report.push_str(&outcome.combined_output);
            return TaskResult::failure(task, report);
        }

        let raw = match runner.copy_out(REPORT_PATH) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return TaskResult::failure(task, format!("report retrieval failed: {e}"))
            }
        };
        let agent_report = match report::parse_final_report(&raw) {
            Ok(r) => r,
            Err(e) => return TaskResult::failure(task, e.to_string()),
        };

        let mut result = TaskResult::new(task, agent_report.status, agent_report.report);
        if agent_report.status == TaskStatus::Success {
            match runner.copy_out(DIFF_PATH) {
                Ok(bytes) => {
                    result.git_diff = Some(String::from_utf8_lossy(&bytes).into_owned());
                }
                Err(e) => return TaskResult::failure(task, format!("diff retrieval failed: {e}")),
            }
        }
        result
    }
}

impl<F: RunnerFactory> SolveTask for TaskSolver<F> {
    fn solve_task(&self, task: &Task) -> TaskResult {
        let mut runner = self.factory.runner(&task.id);
        let mut result = self.drive(&mut runner, task);
        runner.shutdown();
        result.completed_at = Some(chrono::Utc::now().timestamp_millis());
        result
    }
}
