//! Docker CLI adapter for [`ContainerRunner`].
//!
//! Containers are started detached with `sleep infinity` as entrypoint so a
//! single container can serve a whole command sequence; commands go through
//! `docker exec <name> /bin/sh -lc`, each optionally wrapped in `timeout(1)`
//! (exit 124 marks the timeout). Teardown is `docker rm -f` and never fails
//! once the container is gone.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::gate::{ContainerGate, GatePermit};
use crate::runner::{ContainerRunner, RunOutcome, RunStatus, RunnerFactory};

/// Exit status `timeout(1)` reports when the bound is hit.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Delay after `docker run -d` before the container is considered ready.
const READY_DELAY: Duration = Duration::from_millis(500);

static NAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Check that the Docker daemon is running and accessible.
pub fn preflight_docker_running() -> Result<()> {
    let status = Command::new("docker")
        .args(["info"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(s) if s.success() => Ok(()),
        _ => Err(Error::infra("docker daemon is not running")),
    }
}

/// Check that the agent image exists locally.
pub fn preflight_docker_image(image: &str) -> Result<()> {
    let status = Command::new("docker")
        .args(["image", "inspect", image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(s) if s.success() => Ok(()),
        _ => Err(Error::infra(format!("docker image '{image}' not found"))),
    }
}

/// Unique container name for a task run.
fn container_name(task_id: &str) -> String {
    let slug: String = task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let seq = NAME_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "fsc-{}-{}-{}",
        slug,
        chrono::Utc::now().timestamp_millis(),
        seq
    )
}

/// Arguments for the detached `docker run` that starts a container.
fn run_args(name: &str, image: &str, memory_mb: u64, cpu_cores: f64) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--memory".to_string(),
        format!("{memory_mb}m"),
        "--cpus".to_string(),
        format!("{cpu_cores}"),
        image.to_string(),
        "sleep".to_string(),
        "infinity".to_string(),
    ]
}

/// Full argv (program + args) for executing one command in the container.
fn exec_argv(name: &str, command: &str, timeout_seconds: u64) -> Vec<String> {
    let mut argv = Vec::new();
    if timeout_seconds > 0 {
        argv.push("timeout".to_string());
        argv.push(timeout_seconds.to_string());
    }
    argv.extend([
        "docker".to_string(),
        "exec".to_string(),
        name.to_string(),
        "/bin/sh".to_string(),
        "-lc".to_string(),
        command.to_string(),
    ]);
    argv
}

fn spawn(argv: &[String]) -> Result<std::process::Output> {
    Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| Error::infra(format!("failed to spawn {}: {e}", argv[0])))
}

/// One docker container's lifecycle.
pub struct DockerRunner {
    name: String,
    image: String,
    memory_mb: u64,
    cpu_cores: f64,
    gate: Arc<ContainerGate>,
    permit: Option<GatePermit>,
    started: bool,
}

impl DockerRunner {
    pub fn new(task_id: &str, image: &str, memory_mb: u64, cpu_cores: f64, gate: Arc<ContainerGate>) -> Self {
        Self {
            name: container_name(task_id),
            image: image.to_string(),
            memory_mb,
            cpu_cores,
            gate,
            permit: None,
            started: false,
        }
    }

    /// The generated container name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ContainerRunner for DockerRunner {
    fn start(&mut self) -> Result<()> {
        self.permit = Some(self.gate.acquire());
        let argv: Vec<String> = std::iter::once("docker".to_string())
            .chain(run_args(&self.name, &self.image, self.memory_mb, self.cpu_cores))
            .collect();
        let output = spawn(&argv)?;
        if !output.status.success() {
            self.permit = None;
            return Err(Error::infra(format!(
                "container start failure for {}: {}",
                self.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.started = true;
        // The entrypoint needs a beat before exec succeeds reliably.
        std::thread::sleep(READY_DELAY);
        Ok(())
    }

    fn run(&self, commands: &[String], timeout_seconds: u64) -> Result<RunOutcome> {
        let mut combined = String::new();
        for command in commands {
            let output = spawn(&exec_argv(&self.name, command, timeout_seconds))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            combined.push_str(&format!("$ {command}\n"));
            combined.push_str(&stdout);
            if !stderr.is_empty() {
                combined.push_str(&stderr);
            }

            if output.status.code() == Some(TIMEOUT_EXIT_CODE) {
                combined.push_str(&format!(
                    "[timeout] command exceeded {timeout_seconds}s\n"
                ));
                return Ok(RunOutcome {
                    combined_output: combined,
                    status: RunStatus::Timeout,
                    first_error: Some(format!("command timed out after {timeout_seconds}s: {command}")),
                });
            }
            if !output.status.success() {
                let detail = if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                };
                return Ok(RunOutcome {
                    combined_output: combined,
                    status: RunStatus::Failure,
                    first_error: Some(format!("command failed ({}): {detail}", output.status)),
                });
            }
        }
        Ok(RunOutcome {
            combined_output: combined,
            status: RunStatus::Success,
            first_error: None,
        })
    }

    fn copy_out(&self, path: &str) -> Result<Vec<u8>> {
        let staging = tempfile::tempdir()
            .map_err(|e| Error::infra(format!("failed to create staging dir: {e}")))?;
        let dest = staging.path().join("out");
        let argv = vec![
            "docker".to_string(),
            "cp".to_string(),
            format!("{}:{}", self.name, path),
            dest.display().to_string(),
        ];
        let output = spawn(&argv)?;
        if !output.status.success() {
            return Err(Error::infra(format!(
                "copy failure for {path}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        std::fs::read(&dest).map_err(|e| Error::infra(format!("copy failure for {path}: {e}")))
        // `staging` drops here and removes the temporary file.
    }

    fn shutdown(&mut self) {
        if self.started {
            let _ = Command::new("docker")
                .args(["rm", "-f", &self.name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            self.started = false;
        }
        self.permit = None;
    }
}

impl Drop for DockerRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Produces one [`DockerRunner`] per task, all sharing a gate.
pub struct DockerRunnerFactory {
    image: String,
    memory_mb: u64,
    cpu_cores: f64,
    gate: Arc<ContainerGate>,
}

impl DockerRunnerFactory {
    pub fn from_config(config: &Config, gate: Arc<ContainerGate>) -> Self {
        Self {
            image: config.docker_image.clone(),
            memory_mb: config.docker_memory_mb,
            cpu_cores: config.docker_cpu_cores,
            gate,
        }
    }
}

impl RunnerFactory for DockerRunnerFactory {
    type Runner = DockerRunner;

    fn runner(&self, task_id: &str) -> DockerRunner {
        DockerRunner::new(task_id, &self.image, self.memory_mb, self.cpu_cores, Arc::clone(&self.gate))
    }
}
