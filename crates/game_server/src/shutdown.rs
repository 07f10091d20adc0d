//! Shutdown coordination for graceful server shutdown.
//!
//! Shared between the application, the accept loop and every connection
//! task. Flags are polled where a check is cheap; tasks parked on I/O await
//! [`ShutdownState::wait_for_shutdown`] instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Set once shutdown begins; no new connections are accepted
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once the accept loop and connections have wound down
    shutdown_complete: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownState {
    /// Creates a new shutdown state with both flags set to false.
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Returns true if shutdown is complete and final cleanup can begin.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes every task waiting on it.
    pub fn initiate_shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("🛑 Shutdown initiated - no new connections will be accepted");
        self.notify.notify_waiters();
    }

    /// Marks shutdown as complete.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Server drained - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait_for_shutdown(&self) {
        // Registered before the flag check so a concurrent initiate is not missed.
        let notified = self.notify.notified();
        if self.is_shutdown_initiated() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
