//! Interrupt and cancellation handling
//!
//! Ctrl+C sets a process-wide flag. Each run additionally carries its own
//! [`CancelToken`], which an outer supervisor (for example the workflow
//! timeout watchdog) can trip without affecting other runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Global flag for Ctrl+C interrupt handling
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if the application was interrupted (Ctrl+C pressed)
#[inline]
pub fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Set the interrupted flag (called from signal handler)
#[inline]
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Reset the interrupted flag
#[inline]
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Run-scoped cancellation flag, checked by the interpreter between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Steps already in flight finish normally.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True when this token was cancelled or the process got Ctrl+C.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || was_interrupted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global flag is left alone here: interpreter tests in the same
    // binary read it between steps.

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let watchdog = token.clone();
        assert!(!token.flag.load(Ordering::SeqCst));

        watchdog.cancel();
        assert!(token.is_cancelled());
    }
}
