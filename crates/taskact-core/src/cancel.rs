use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cooperative cancellation flag shared by the task fetch, retry waits, and
/// every spawned process. Clones observe the same flag. The CLI trips it
/// from its SIGINT handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        let mut flag = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout`, waking early on cancellation. Returns true
    /// if the token was cancelled, so backoff waits can abort immediately.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (flag, _) = self
            .inner
            .cond
            .wait_timeout_while(flag, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *flag
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
