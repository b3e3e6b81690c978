//! Cooperative cancellation (§5).
//!
//! The evaluator never polls a clock or spawns its own timers. A driver that
//! wants a timeout builds a [`CancellationToken`], flips it from another
//! thread (or a `SIGALRM`-style hook) after a deadline, and every suspension
//! point — collaborator calls, pipeline stage boundaries, `/for` iterations —
//! checks it cooperatively via [`CancellationToken::check`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloneable, shareable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

/// Returned by any suspension point when cancellation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The cooperative checkpoint every suspension point calls.
    ///
    /// # Errors
    /// Returns [`Aborted`] if cancellation was requested since the token was
    /// created or last checked.
    pub fn check(&self) -> Result<(), Aborted> {
        if self.is_cancelled() {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    /// A token that can never be cancelled, for callers that don't need one.
    #[must_use]
    pub fn never() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert_eq!(clone.check(), Err(Aborted));
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
