//! Step-granular cancellation and timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline.
///
/// Clones observe the same flag. The generation loop checks it once per step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is never cancelled
    pub fn never() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now, in addition to manual cancellation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `Err(Cancelled)` once cancelled or past the deadline
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::ParrotError::Cancelled("cancellation requested".to_string()));
        }
        if self.is_expired() {
            return Err(crate::ParrotError::Cancelled("timeout elapsed".to_string()));
        }
        Ok(())
    }
}
