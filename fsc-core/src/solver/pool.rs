//! Bounded-parallel execution of a batch of tasks.
//!
//! The pool owns a priority queue and up to `max_parallel` worker threads.
//! Dispatch order is `(priority desc, insertion order asc)`; results arrive
//! in completion order. `stop()` is cooperative: in-flight tasks run to
//! completion, everything still queued is reported as `Failure` with report
//! `"cancelled"`. Every added task appears in `reports()` exactly once with
//! a terminal status.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::solver::SolveTask;
use crate::task::{Task, TaskResult, TaskStatus};

/// Snapshot of pool progress for publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
}

struct QueuedTask {
    task: Task,
}

/// Priority-ordered task pool driving one [`SolveTask`] implementation.
pub struct SolverPool<S: SolveTask> {
    solver: S,
    max_parallel: usize,
    queue: Mutex<Vec<QueuedTask>>,
    results: Mutex<Vec<TaskResult>>,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    cancelled: AtomicBool,
    started: AtomicBool,
    current: Mutex<Option<String>>,
    done: Mutex<bool>,
    done_signal: Condvar,
}

impl<S: SolveTask> SolverPool<S> {
    pub fn new(solver: S, max_parallel: usize) -> Self {
        Self {
            solver,
            max_parallel: max_parallel.max(1),
            queue: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            current: Mutex::new(None),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
        }
    }

    /// Enqueue a task. The insert position encodes the dispatch order:
    /// equal priorities stay in insertion order, higher priorities go first.
    pub fn add_task(&self, task: Task) {
        let mut queue = self.queue.lock().expect("pool queue poisoned");
        let pos = queue
            .iter()
            .position(|q| q.task.priority < task.priority)
            .unwrap_or(queue.len());
        queue.insert(pos, QueuedTask { task });
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Run every queued task to a terminal result. Blocks until the queue is
    /// drained or the pool is cancelled; a second call while running (or
    /// after completion) is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        std::thread::scope(|scope| {
            for _ in 0..self.max_parallel {
                scope.spawn(|| self.worker_loop());
            }
        });

        // Anything still queued was cancelled (or raced in after the workers
        // drained): report it rather than losing it.
        loop {
            let next = self.pop_next();
            let Some(queued) = next else { break };
            let result = if self.cancelled.load(Ordering::SeqCst) {
                let mut r = TaskResult::failure(&queued.task, "cancelled");
                r.completed_at = Some(chrono::Utc::now().timestamp_millis());
                r
            } else {
                self.solver.solve_task(&queued.task)
            };
            self.push_result(result);
        }

        let mut done = self.done.lock().expect("pool done flag poisoned");
        *done = true;
        self.done_signal.notify_all();
    }

    /// Cooperative cancellation: stop dispatching new tasks. In-flight tasks
    /// finish on their own (or hit their container timeout).
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Snapshot of completed results, in completion order.
    pub fn reports(&self) -> Vec<TaskResult> {
        self.results.lock().expect("pool results poisoned").clone()
    }

    /// Snapshot counts for progress publication.
    pub fn counts(&self) -> PoolCounts {
        let results = self.results.lock().expect("pool results poisoned");
        let failed = results
            .iter()
            .filter(|r| r.status == TaskStatus::Failure)
            .count();
        PoolCounts {
            total: self.total.load(Ordering::SeqCst),
            completed: results.len() - failed,
            failed,
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Id of a task currently being solved, if any.
    pub fn current_task(&self) -> Option<String> {
        self.current.lock().expect("pool current poisoned").clone()
    }

    /// Wait until `start` has finished, up to `timeout`. Returns whether the
    /// pool is done.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let done = self.done.lock().expect("pool done flag poisoned");
        if *done {
            return true;
        }
        let (done, _) = self
            .done_signal
            .wait_timeout(done, timeout)
            .expect("pool done flag poisoned");
        *done
    }

    fn pop_next(&self) -> Option<QueuedTask> {
        let mut queue = self.queue.lock().expect("pool queue poisoned");
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn push_result(&self, result: TaskResult) {
        self.results
            .lock()
            .expect("pool results poisoned")
            .push(result);
    }

    fn worker_loop(&self) {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            let Some(queued) = self.pop_next() else { break };
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            *self.current.lock().expect("pool current poisoned") = Some(queued.task.id.clone());
            let result = self.solver.solve_task(&queued.task);
            self.push_result(result);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
