//! Flags shared between the pipeline worker and its controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state accessible by the worker and the controller thread.
pub struct SharedState {
    /// Ask the run loop to exit before the next iteration.
    stop_requested: AtomicBool,

    /// Set while `run()` is executing.
    running: AtomicBool,

    /// A controller link has been handed out.
    controller_linked: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the controller as linked. Returns false if it already was.
    pub fn try_link_controller(&self) -> bool {
        !self.controller_linked.swap(true, Ordering::SeqCst)
    }

    pub fn is_controller_linked(&self) -> bool {
        self.controller_linked.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            controller_linked: AtomicBool::new(false),
        }
    }
}
