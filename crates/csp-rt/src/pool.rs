// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fixed pool of worker threads.
//!
//! Jobs travel over an unbounded crate `Channel`; workers block in `take`
//! and exit once the channel is closed and drained.

use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::channel::Channel;
use crate::error::SpawnError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    jobs: Channel<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `count` workers named `{name}-{id}`.
    pub fn new(count: usize, name: &str) -> Result<Self, SpawnError> {
        let jobs: Channel<Job> = Channel::with_capacity(usize::MAX);
        let pool = Self {
            jobs,
            workers: Mutex::new(Vec::with_capacity(count)),
        };

        for id in 0..count {
            let jobs = pool.jobs.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker_loop(&jobs));
            match spawned {
                Ok(handle) => pool.lock_workers().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(SpawnError::Thread(e.kind()));
                }
            }
        }

        tracing::debug!(workers = count, prefix = name, "worker pool started");
        Ok(pool)
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a job. Fails once the pool is shut down.
    pub fn submit(&self, job: Job) -> Result<(), SpawnError> {
        self.jobs.put(job).map_err(|_| SpawnError::ShutDown)
    }

    pub fn is_shut_down(&self) -> bool {
        self.jobs.is_closed()
    }

    /// Stop accepting jobs, let workers finish what is queued, join them.
    ///
    /// A worker calling this (a task dropping the last runtime handle) is
    /// not joined.
    pub fn shutdown(&self) {
        self.jobs.close();
        let me = thread::current().id();
        let workers: Vec<_> = self.lock_workers().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == me {
                continue;
            }
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                tracing::warn!(worker = ?name, "worker thread panicked");
            }
        }
    }
}

fn worker_loop(jobs: &Channel<Job>) {
    while let Ok(job) = jobs.take() {
        job();
    }
}
