// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CSP runtime on OS threads.
//!
//! Channels, select, and task spawning without green threads. Every
//! blocking operation parks a real thread; cancellation is cooperative via
//! a per-task token that all blocking primitives here observe.
//!
//! Components:
//! - channel — rendezvous / buffered / timeout channels
//! - select — random-fair multiplexing with timeout and non-blocking modes
//! - spawn — `Runtime`: pooled and daemon tasks, stop/shutdown
//! - timeout — `with_timeout`, interruptible sleep, one-shot timers
//! - cancel — cancel tokens and the current-task token

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
mod pool;
pub mod registry;
pub mod select;
pub mod spawn;
pub mod timeout;

pub use channel::{buffered, channel, timeout_channel, Channel, ChannelKind, Timeout, TryIter};
pub use config::RuntimeConfig;
pub use error::{ChannelError, PutError, SpawnError, TaskError, TimedOut, TryPutError, TryTakeError};
pub use select::{
    select, select_no_wait, select_priority, select_timeout, select_with, Backoff, SelectOptions,
    Selected, Wait,
};
pub use spawn::{DaemonHandle, Runtime, TaskHandle, TaskOutcome};
pub use timeout::{sleep, timer_after, with_timeout};
