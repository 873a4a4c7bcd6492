//! Failure taxonomy for the orchestration runtime.
//!
//! Every component translates its failures into the smallest-scope variant:
//! a single task's problems end up inside its `TaskResult`, a single diff's
//! problems inside its commit outcome, and only job-scoped failures
//! (`Config`, `Analysis`, `State`, uncaught `Infra`, `Cancelled`) take the
//! whole job to `Failed`.

use thiserror::Error;

/// Result alias used throughout `fsc-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds the runtime distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or absent configuration; surfaced at job creation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Container engine, git binary, or filesystem failure.
    #[error("infrastructure error: {0}")]
    Infra(String),

    /// The analysis stage failed or returned an unusable task list.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// A single task's container run, parse, or diff retrieval failed.
    #[error("task failure: {0}")]
    TaskFailure(String),

    /// Working tree in an unacceptable state for committing.
    #[error("working tree is not in a clean state: {0}")]
    DirtyTree(String),

    /// A diff did not apply cleanly.
    #[error("diff did not apply: {0}")]
    Apply(String),

    /// Cooperative cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Persistence IO failure.
    #[error("state error: {0}")]
    State(String),
}

impl Error {
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn infra(msg: impl std::fmt::Display) -> Self {
        Self::Infra(msg.to_string())
    }

    pub fn analysis(msg: impl std::fmt::Display) -> Self {
        Self::Analysis(msg.to_string())
    }

    pub fn task(msg: impl std::fmt::Display) -> Self {
        Self::TaskFailure(msg.to_string())
    }

    pub fn state(msg: impl std::fmt::Display) -> Self {
        Self::State(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = Error::config("maxTasks must be >= minTasks");
        assert_eq!(
            e.to_string(),
            "configuration error: maxTasks must be >= minTasks"
        );

        let e = Error::infra("docker not running");
        assert!(e.to_string().starts_with("infrastructure error:"));
    }

    #[test]
    fn cancelled_has_fixed_message() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
    }
}
