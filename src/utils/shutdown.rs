// src/utils/shutdown.rs
//! Process-wide cancellation signal
//!
//! Every worker loop checks the signal at its iteration boundary (per batch
//! for dispatchers), so a trigger stops the pipeline within one batch. Async
//! tasks await [`Shutdown::cancelled`]; worker threads block in
//! [`Shutdown::sleep`] on a condvar that the trigger wakes.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Wakeup {
    lock: Mutex<()>,
    changed: Condvar,
}

/// Cloneable handle to a shared stop signal
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    wakeup: Arc<Wakeup>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
        let _guard = self
            .wakeup
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.wakeup.changed.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown is triggered
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleeps for `duration`, waking early if shutdown is triggered
    ///
    /// Returns `true` when the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self
            .wakeup
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _guard = self
            .wakeup
            .changed
            .wait_timeout_while(guard, duration, |_| !self.token.is_cancelled())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !self.token.is_cancelled()
    }
}
