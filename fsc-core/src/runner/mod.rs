//! Container lifecycle and command execution.
//!
//! The [`ContainerRunner`] port isolates the rest of the runtime from the
//! container engine: solvers drive containers only through these four
//! operations, and tests substitute mocks. The docker-CLI adapter lives in
//! [`docker`]; [`gate`] holds the process-wide container-count semaphore.

pub mod docker;
pub mod gate;

pub use docker::{preflight_docker_image, preflight_docker_running, DockerRunner, DockerRunnerFactory};
pub use gate::{ContainerGate, GatePermit};

use crate::error::Result;

/// Terminal status of a command-sequence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every command exited zero.
    Success,
    /// A command exited non-zero; the rest were not run.
    Failure,
    /// A command hit the per-command timeout; the rest were not run.
    Timeout,
}

/// Outcome of [`ContainerRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Accumulated `$ <cmd>\n<output>` blocks for every command that ran.
    pub combined_output: String,
    pub status: RunStatus,
    /// Output of the first failing command, when one failed.
    pub first_error: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Port for one isolated container's lifecycle.
///
/// The runner never retries; callers decide what a failure means. Whoever
/// calls [`ContainerRunner::start`] is responsible for calling
/// [`ContainerRunner::shutdown`] on every exit path.
pub trait ContainerRunner {
    /// Start a detached container with a long-lived no-op entrypoint and
    /// wait until it accepts commands.
    fn start(&mut self) -> Result<()>;

    /// Execute `commands` sequentially through the container's shell,
    /// stopping at the first non-zero exit. `timeout_seconds` bounds each
    /// command individually; 0 disables the bound.
    fn run(&self, commands: &[String], timeout_seconds: u64) -> Result<RunOutcome>;

    /// Copy a file out of the container and return its contents.
    fn copy_out(&self, path: &str) -> Result<Vec<u8>>;

    /// Forcibly remove the container. Idempotent; never fails once the
    /// container is gone.
    fn shutdown(&mut self);
}

/// Port for producing one runner per task.
pub trait RunnerFactory: Send + Sync {
    type Runner: ContainerRunner;

    fn runner(&self, task_id: &str) -> Self::Runner;
}
