use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One-shot flag that threads can sleep on.
///
/// Used as a stop flag by timer threads and as a start gate by the reader.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter. Idempotent.
    pub(crate) fn raise(&self) {
        let mut raised = self.lock();
        *raised = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_raised(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `timeout` or until raised. Returns `true` if raised.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.lock();
        while !*raised {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            raised = self
                .wake
                .wait_timeout(raised, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *raised
    }

    /// Block until raised.
    pub(crate) fn wait_raised(&self) {
        let mut raised = self.lock();
        while !*raised {
            raised = self
                .wake
                .wait(raised)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
