use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::task::CancelHandle;

/// Enforces the batch's wall-clock budget: a single timer that, on expiry,
/// cancels whichever task is bound at that moment. Fires at most once;
/// firing with nothing bound, or with a task that already finished, is a
/// no-op.
pub struct DeadlineWatcher {
    fired: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<CancelHandle>>>,
    timer: CancellationToken,
    reason: String,
}

impl DeadlineWatcher {
    pub fn new(budget: Duration, reason: &str) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let bound = Arc::new(Mutex::new(None::<CancelHandle>));
        let timer = CancellationToken::new();
        {
            let fired = fired.clone();
            let bound = bound.clone();
            let timer = timer.clone();
            let reason = reason.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer.cancelled() => {}
                    _ = tokio::time::sleep(budget) => {
                        fired.store(true, Ordering::SeqCst);
                        info!(
                            budget_ms = budget.as_millis() as u64,
                            "time budget exhausted, canceling the current task"
                        );
                        let handle = bound.lock().unwrap().clone();
                        if let Some(handle) = handle {
                            handle.cancel(Some(reason));
                        }
                    }
                }
            });
        }
        Self {
            fired,
            bound,
            timer,
            reason: reason.to_string(),
        }
    }

    /// Synchronous poll for the orchestrator's pre-run check on tasks that
    /// have not started yet.
    pub fn is_timeout(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Makes `handle` the cancellation target. Binding after expiry cancels
    /// it on the spot, closing the race between the poll and the timer.
    pub fn bind(&self, handle: CancelHandle) {
        *self.bound.lock().unwrap() = Some(handle.clone());
        if self.is_timeout() {
            handle.cancel(Some(self.reason.clone()));
        }
    }

    pub fn unbind(&self) {
        self.bound.lock().unwrap().take();
    }

    /// Stops the timer. Must run once the batch completes so nothing fires
    /// afterwards and no timer task keeps the process alive.
    pub fn clear(&self) {
        self.timer.cancel();
    }
}
