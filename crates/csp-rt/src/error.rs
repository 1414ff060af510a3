// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types for channels, tasks, and timeouts.
//!
//! Timing conditions are not errors here: bounded selects report
//! `Selected::Timeout` as a value. Only `with_timeout` uses `TimedOut`.

use std::fmt;

use thiserror::Error;

/// Why a channel operation could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel was closed before or during the operation.
    #[error("channel is closed")]
    Closed,

    /// The operation is not available on this channel flavor.
    #[error("operation not supported on a timeout channel")]
    Unsupported,

    /// The calling task was cancelled while blocked.
    #[error("interrupted by cancellation")]
    Interrupted,
}

/// A rejected `put`. Hands the value back to the caller.
pub struct PutError<T> {
    pub kind: ChannelError,
    pub value: T,
}

impl<T> PutError<T> {
    pub(crate) fn new(kind: ChannelError, value: T) -> Self {
        Self { kind, value }
    }

    /// Drop the value, keeping only the reason.
    pub fn into_kind(self) -> ChannelError {
        self.kind
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutError")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "put failed: {}", self.kind)
    }
}

impl<T> std::error::Error for PutError<T> {}

/// Non-blocking put outcome.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPutError<T> {
    /// Buffer full, or no taker waiting on a rendezvous channel.
    Full(T),
    Closed(T),
    Unsupported(T),
}

impl<T> TryPutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPutError::Full(v) | TryPutError::Closed(v) | TryPutError::Unsupported(v) => v,
        }
    }
}

/// Non-blocking take outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryTakeError {
    /// Nothing available right now.
    #[error("channel is empty")]
    Empty,
    /// Closed and drained; nothing will ever arrive.
    #[error("channel is closed and empty")]
    Closed,
}

/// Error returned by a supervised task body. Panics are not errors; they
/// surface as `TaskOutcome::Panicked` on the handle.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Cancelled by `stop()` or a timeout. Expected; never reported.
    #[error("task was interrupted")]
    Interrupted,

    #[error("task failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Wrap any error as a task failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Failed(Box::new(err))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }
}

impl From<ChannelError> for TaskError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Interrupted => TaskError::Interrupted,
            other => TaskError::failed(other),
        }
    }
}

impl<T> From<PutError<T>> for TaskError {
    fn from(err: PutError<T>) -> Self {
        TaskError::from(err.kind)
    }
}

/// Returned by the spawn family once the runtime has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("runtime is shut down")]
    ShutDown,

    #[error("failed to start thread: {0:?}")]
    Thread(std::io::ErrorKind),
}

/// Timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out")]
pub struct TimedOut;
