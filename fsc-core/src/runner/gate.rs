//! Process-wide cap on live containers.
//!
//! One `ContainerGate` is built at program start and shared (via `Arc`) by
//! every runner factory in the process. Each started container holds a
//! [`GatePermit`] for its lifetime; `acquire` blocks while the cap is
//! reached.

use std::sync::{Arc, Condvar, Mutex};

/// Counting semaphore sized to `max_docker_containers`.
pub struct ContainerGate {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl ContainerGate {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(self: &Arc<Self>) -> GatePermit {
        let mut in_use = self.in_use.lock().expect("gate lock poisoned");
        while *in_use >= self.capacity {
            in_use = self.freed.wait(in_use).expect("gate lock poisoned");
        }
        *in_use += 1;
        GatePermit {
            gate: Arc::clone(self),
        }
    }

    /// Number of containers currently holding a permit.
    pub fn in_use(&self) -> usize {
        *self.in_use.lock().expect("gate lock poisoned")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock().expect("gate lock poisoned");
        *in_use = in_use.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// RAII slot in the gate; dropping it frees the slot.
pub struct GatePermit {
    gate: Arc<ContainerGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
