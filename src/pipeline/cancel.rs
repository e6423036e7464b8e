//! Cooperative cancellation for work on the blocking pool.
//!
//! A `spawn_blocking` task cannot be aborted once it has started. The
//! classifier, the text extractor and the renderers instead check a
//! [`CancelFlag`] before each page and stop early once it is set.
//!
//! The async side sets the flag when a budget expires, and a
//! [`CancelOnDrop`] guard sets it when the awaiting future is dropped, so a
//! caller that gives up on a request also stops its blocking work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop signal, cheap to clone into a blocking closure.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// A guard that cancels this flag when it goes out of scope.
    ///
    /// Cancelling after the work has finished is a no-op, so the guard
    /// never needs disarming.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Sets its [`CancelFlag`] on drop.
#[derive(Debug)]
pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
