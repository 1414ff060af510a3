// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Sleep and timeout.
//!
//! `with_timeout` runs the operation on its own thread and races it
//! against the deadline. Expiry cancels the operation's token; that only
//! stops code which reaches a cancellation point (channel waits, select,
//! `sleep`, `cancel::checkpoint`).

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::{self, CancelToken};
use crate::channel::{self, Channel, Timeout};
use crate::error::{ChannelError, TimedOut};

const SLEEP_TICK: Duration = Duration::from_millis(5);

/// Sleep the current thread, waking early with `Interrupted` if the
/// current task is cancelled. A duration too large to add to the current
/// instant sleeps until cancelled.
pub fn sleep(duration: Duration) -> Result<(), ChannelError> {
    let deadline = Instant::now().checked_add(duration);
    loop {
        cancel::checkpoint()?;
        let left = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => SLEEP_TICK,
        };
        if left.is_zero() {
            return Ok(());
        }
        thread::sleep(left.min(SLEEP_TICK));
    }
}

/// One-shot timer: a timeout channel that receives `Timeout` after
/// `duration`.
pub fn timer_after(duration: Duration) -> Channel<Timeout> {
    channel::timeout_channel(duration)
}

/// Run `f` with a deadline. Returns `Err(TimedOut)` if it doesn't finish
/// within `duration`, after requesting its cancellation.
///
/// A panic inside `f` is resumed on the caller.
pub fn with_timeout<T, F>(duration: Duration, f: F) -> Result<T, TimedOut>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let token = Arc::new(CancelToken::new());
    let slot: Channel<thread::Result<T>> = channel::buffered(1);

    let tx = slot.clone();
    let task_token = token.clone();
    thread::spawn(move || {
        let _current = cancel::enter(task_token);
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let _ = tx.put(result);
    });

    match slot.take_timeout(duration) {
        Ok(Some(Ok(val))) => Ok(val),
        Ok(Some(Err(payload))) => panic::resume_unwind(payload),
        Ok(None) | Err(_) => {
            token.cancel();
            slot.close();
            tracing::trace!(?duration, "operation timed out");
            Err(TimedOut)
        }
    }
}
