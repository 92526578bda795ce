//! Cancellable one-shot timer.

use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot timer with a single pending expiry.
///
/// Arming replaces any pending expiry. Dropping the timer cancels it, so an
/// owner's teardown path only has to drop (or `cancel`) its timers.
#[derive(Debug, Default)]
pub struct ResetTimer {
    pending: Option<JoinHandle<()>>,
}

impl ResetTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Run `on_expiry` after `after`, cancelling any pending expiry first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&mut self, after: Duration, on_expiry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_expiry();
        }));
    }

    /// Cancel the pending expiry.
    ///
    /// Returns true if an expiry was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether an expiry is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ResetTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
