//! Cooperative cancellation shared by every task of a run.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// A callback invoked once when the token fires.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// A token for cooperative cancellation.
///
/// Firing is idempotent and the first reason wins. Tasks can poll
/// [`is_cancelled`](Self::is_cancelled) or await [`cancelled`](Self::cancelled)
/// inside a `select!`.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Vec<CancelCallback>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new, unfired token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token.
    ///
    /// Only the first call has any effect. Registered callbacks run on the
    /// calling thread; a panicking callback is logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        *self.reason.write() = Some(reason.into());
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            run_callback(&callback);
        }
    }

    /// Registers a callback. Runs immediately if the token already fired.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: CancelCallback = Box::new(callback);
        {
            let mut callbacks = self.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push(callback);
                return;
            }
        }
        run_callback(&callback);
    }

    /// Returns whether the token fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the first cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once the token fires.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: &CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
