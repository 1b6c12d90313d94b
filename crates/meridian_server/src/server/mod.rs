//! Server orchestration: accept loop, admission, connection lifecycle.

pub mod core;
pub mod handlers;

pub use core::GameServer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state for coordinating a two-phase graceful shutdown.
///
/// Phase one stops the accept loop and background tasks; phase two marks
/// shutdown complete once in-flight work has drained.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    initiated: Arc<AtomicBool>,
    completed: Arc<AtomicBool>,
}

impl ShutdownState {
    /// Creates a fresh, not-yet-initiated shutdown state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that shutdown has begun.
    pub fn initiate_shutdown(&self) {
        self.initiated.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Marks shutdown as fully complete.
    pub fn complete_shutdown(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has fully completed.
    pub fn is_shutdown_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}
