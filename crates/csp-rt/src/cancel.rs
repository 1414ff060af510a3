// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation.
//!
//! Each task runs with a `CancelToken` installed as the thread's current
//! token. Blocking channel waits, selects and `sleep` poll it, so
//! cancelling the token interrupts the task at its next blocking point.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ChannelError;

/// Cancellation token shared between a task and whoever may cancel it.
#[derive(Debug)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Set the cancellation flag. Monotonic.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<CancelToken>>> = const { RefCell::new(None) };
}

/// Restores the previously installed token when dropped.
pub(crate) struct CurrentGuard {
    prev: Option<Arc<CancelToken>>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|cell| *cell.borrow_mut() = prev);
    }
}

/// Make `token` the calling thread's current token until the guard drops.
pub(crate) fn enter(token: Arc<CancelToken>) -> CurrentGuard {
    let prev = CURRENT.with(|cell| cell.borrow_mut().replace(token));
    CurrentGuard { prev }
}

/// The token of the task running on this thread, if any.
pub fn current() -> Option<Arc<CancelToken>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Check if the current task has been cancelled.
///
/// Always false on threads not started by this crate.
pub fn cancelled() -> bool {
    CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    })
}

/// `Err(Interrupted)` once the current task is cancelled.
pub fn checkpoint() -> Result<(), ChannelError> {
    if cancelled() {
        Err(ChannelError::Interrupted)
    } else {
        Ok(())
    }
}
