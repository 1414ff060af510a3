// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.

use std::thread;

/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "CSP_RT_WORKERS";

/// Settings for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Shared pool size. 0 means one worker per available core.
    pub workers: usize,
    /// Worker threads are named `{thread_name}-{id}`.
    pub thread_name: String,
    /// Daemon threads are named `{daemon_name}-{n}`.
    pub daemon_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name: "csp-worker".to_string(),
            daemon_name: "csp-daemon".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with `CSP_RT_WORKERS` applied when set. An unparsable
    /// value is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(WORKERS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.workers = n,
                Err(e) => {
                    tracing::warn!(var = WORKERS_ENV, value = %raw, error = %e, "ignoring bad worker count")
                }
            }
        }
        config
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn daemon_name(mut self, name: impl Into<String>) -> Self {
        self.daemon_name = name.into();
        self
    }

    /// Resolved pool size, never 0.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}
