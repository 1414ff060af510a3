// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Select: multiplex over several channels.
//!
//! Polls channels with `try_take` in a random order, so detecting a ready
//! channel and consuming its value is one step. A value another reader
//! grabbed first simply shows up as `Empty`. Blocking selects spin with
//! exponential backoff between polls.
//!
//! Preferred channels are visited before non-preferred ones; within each
//! group the order is a fresh uniform shuffle per poll.

use std::thread;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::cancel;
use crate::channel::Channel;
use crate::error::TryTakeError;

/// Result of a select operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected<T> {
    /// Took a value from the channel at the given index.
    Recv(usize, T),
    /// Bounded select expired with nothing ready. Nothing was consumed.
    Timeout,
    /// Non-blocking select found nothing; carries the caller's default.
    Default(Option<T>),
    /// Every channel is closed and drained.
    AllClosed,
    /// The calling task was cancelled while waiting.
    Interrupted,
}

impl<T> Selected<T> {
    /// The received value, or the default of a non-blocking select.
    pub fn into_value(self) -> Option<T> {
        match self {
            Selected::Recv(_, val) => Some(val),
            Selected::Default(val) => val,
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Selected::Recv(_, val) => Some(val),
            Selected::Default(val) => val.as_ref(),
            _ => None,
        }
    }

    /// Index of the channel the value came from.
    pub fn index(&self) -> Option<usize> {
        match self {
            Selected::Recv(idx, _) => Some(*idx),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Selected::Timeout)
    }
}

/// Sleep schedule between polls of a blocking select.
///
/// A zero `min` is raised to [`Backoff::FLOOR`] when the select runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Shortest nap between polls.
    pub const FLOOR: Duration = Duration::from_nanos(1);

    /// Limits with `min >= FLOOR` and `max >= min`.
    fn clamped(self) -> Self {
        let min = self.min.max(Self::FLOOR);
        Self { min, max: self.max.max(min) }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_nanos(100),
            max: Duration::from_millis(1),
        }
    }
}

/// How long a select may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Until a value arrives (or every channel closes).
    #[default]
    Forever,
    /// Until the duration elapses.
    For(Duration),
    /// Poll once and return.
    NoWait,
}

/// Knobs for [`select_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectOptions {
    pub wait: Wait,
    pub backoff: Backoff,
}

impl SelectOptions {
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.wait = Wait::For(duration);
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.wait = Wait::NoWait;
        self
    }

    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = Backoff { min, max }.clamped();
        self
    }
}

/// Block until one of `channels` yields a value.
pub fn select<T>(channels: &[&Channel<T>]) -> Selected<T> {
    select_with(channels, SelectOptions::default())
}

/// Like [`select`], but gives up with `Selected::Timeout` after `duration`.
/// A duration too large to add to the current instant waits forever.
pub fn select_timeout<T>(duration: Duration, channels: &[&Channel<T>]) -> Selected<T> {
    select_with(channels, SelectOptions::default().timeout(duration))
}

/// Poll once. Returns `Selected::Default(default)` when nothing is ready.
pub fn select_no_wait<T>(channels: &[&Channel<T>], default: Option<T>) -> Selected<T> {
    match select_with(channels, SelectOptions::default().no_wait()) {
        Selected::Default(_) => Selected::Default(default),
        other => other,
    }
}

/// Random-fair select with explicit wait mode and backoff.
pub fn select_with<T>(channels: &[&Channel<T>], opts: SelectOptions) -> Selected<T> {
    if channels.is_empty() {
        return Selected::AllClosed;
    }
    let deadline = match opts.wait {
        Wait::For(d) => Instant::now().checked_add(d),
        _ => None,
    };
    let limits = opts.backoff.clamped();

    let mut order: Vec<usize> = (0..channels.len()).collect();
    let mut rng = rand::thread_rng();
    let mut backoff = limits.min;

    loop {
        order.shuffle(&mut rng);
        // Stable sort keeps the shuffle within each group.
        order.sort_by_key(|&idx| !channels[idx].is_preferred());

        match poll_in_order(channels, &order) {
            Poll::Ready(idx, val) => return Selected::Recv(idx, val),
            Poll::AllClosed => return Selected::AllClosed,
            Poll::Pending => {}
        }

        if let Some(ret) = pause(opts.wait, deadline, &mut backoff, limits.max) {
            return ret;
        }
    }
}

/// Priority select: channels are polled in listed order, first ready wins.
///
/// `has_default`: if true, returns `Default(None)` immediately when all
/// channels are empty.
pub fn select_priority<T>(channels: &[&Channel<T>], has_default: bool) -> Selected<T> {
    if channels.is_empty() {
        return Selected::AllClosed;
    }
    let order: Vec<usize> = (0..channels.len()).collect();
    let wait = if has_default { Wait::NoWait } else { Wait::Forever };
    let limits = Backoff::default();
    let mut backoff = limits.min;

    loop {
        match poll_in_order(channels, &order) {
            Poll::Ready(idx, val) => return Selected::Recv(idx, val),
            Poll::AllClosed => return Selected::AllClosed,
            Poll::Pending => {}
        }
        if let Some(ret) = pause(wait, None, &mut backoff, limits.max) {
            return ret;
        }
    }
}

enum Poll<T> {
    Ready(usize, T),
    Pending,
    AllClosed,
}

fn poll_in_order<T>(channels: &[&Channel<T>], order: &[usize]) -> Poll<T> {
    let mut all_closed = true;
    for &idx in order {
        match channels[idx].try_take() {
            Ok(val) => return Poll::Ready(idx, val),
            Err(TryTakeError::Empty) => all_closed = false,
            Err(TryTakeError::Closed) => {}
        }
    }
    if all_closed {
        Poll::AllClosed
    } else {
        Poll::Pending
    }
}

/// Decide whether to keep polling. Sleeps and returns `None` to continue;
/// returns the final result otherwise.
fn pause<T>(
    wait: Wait,
    deadline: Option<Instant>,
    backoff: &mut Duration,
    max: Duration,
) -> Option<Selected<T>> {
    if wait == Wait::NoWait {
        return Some(Selected::Default(None));
    }
    if cancel::cancelled() {
        return Some(Selected::Interrupted);
    }
    let mut nap = *backoff;
    if let Some(d) = deadline {
        let left = d.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Some(Selected::Timeout);
        }
        nap = nap.min(left);
    }
    thread::sleep(nap);
    *backoff = backoff.saturating_mul(2).min(max);
    None
}
