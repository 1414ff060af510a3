// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task launcher: spawn onto the shared pool or a daemon thread, stop and
//! shut down.
//!
//! A `Runtime` is an explicit object shared by cloning. Every pooled task
//! gets a `CancelToken` installed as its thread's current token and a
//! `TaskHandle` in the runtime's registry. `stop()` drains the registry
//! and cancels each token; blocked channel ops inside those tasks then
//! fail with `Interrupted`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::{self, CancelToken};
use crate::config::RuntimeConfig;
use crate::error::{SpawnError, TaskError};
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Cancelled before it started, or ended by an interrupt.
    Cancelled,
    Panicked(String),
    /// A supervised body returned an error.
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Completion slot shared by a task and its handles.
#[derive(Default)]
struct Completion {
    outcome: Mutex<Option<TaskOutcome>>,
    done: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, Option<TaskOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, outcome: TaskOutcome) {
        *self.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn get(&self) -> Option<TaskOutcome> {
        self.lock().clone()
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Option<TaskOutcome> {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            slot = match deadline {
                None => self.done.wait(slot).unwrap_or_else(PoisonError::into_inner),
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    match self.done.wait_timeout(slot, left) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
    }
}

/// Cancellable reference to a pooled task. Cheap to clone.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    token: Arc<CancelToken>,
    completion: Arc<Completion>,
}

impl TaskHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            token: Arc::new(CancelToken::new()),
            completion: Arc::new(Completion::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. Does not wait.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.get().is_some()
    }

    /// The outcome, if the task has finished.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.completion.get()
    }

    /// Block until the task finishes.
    ///
    /// Never returns for a task stuck in code that doesn't observe
    /// cancellation.
    pub fn join(&self) -> TaskOutcome {
        self.completion
            .wait_until(None)
            .unwrap_or(TaskOutcome::Cancelled)
    }

    /// Like `join`, but `None` if still running after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.completion.wait_until(Instant::now().checked_add(timeout))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("outcome", &self.completion.get())
            .finish()
    }
}

/// Handle to a daemon task. Observable, not cancellable.
#[derive(Clone)]
pub struct DaemonHandle {
    name: String,
    completion: Arc<Completion>,
}

impl DaemonHandle {
    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.completion.get().is_some()
    }

    pub fn join(&self) -> TaskOutcome {
        self.completion
            .wait_until(None)
            .unwrap_or(TaskOutcome::Cancelled)
    }

    pub fn join_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.completion.wait_until(Instant::now().checked_add(timeout))
    }
}

impl fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("name", &self.name)
            .field("outcome", &self.completion.get())
            .finish()
    }
}

struct Shared {
    config: RuntimeConfig,
    pool: WorkerPool,
    registry: TaskRegistry,
    next_task: AtomicU64,
    next_daemon: AtomicU64,
    shut_down: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            for handle in self.registry.drain() {
                handle.cancel();
            }
            self.pool.shutdown();
        }
    }
}

/// Task launcher with its shared worker pool and task registry.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Start a runtime with default settings.
    pub fn new() -> Result<Self, SpawnError> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, SpawnError> {
        let pool = WorkerPool::new(config.worker_count(), &config.thread_name)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pool,
                registry: TaskRegistry::new(),
                next_task: AtomicU64::new(1),
                next_daemon: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Run `f` on the shared pool. Panics are recorded on the handle and
    /// otherwise discarded.
    pub fn spawn<F>(&self, f: F) -> Result<TaskHandle, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.launch(
            move || {
                f();
                Ok(())
            },
            false,
        )
    }

    /// Run `f` on the shared pool and report every failure (error or
    /// panic) except interrupts.
    pub fn spawn_supervised<F>(&self, f: F) -> Result<TaskHandle, SpawnError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        self.launch(f, true)
    }

    fn launch<F>(&self, f: F, supervised: bool) -> Result<TaskHandle, SpawnError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(SpawnError::ShutDown);
        }
        let handle = TaskHandle::new(self.shared.next_task.fetch_add(1, Ordering::Relaxed));
        let task = handle.clone();
        self.shared
            .pool
            .submit(Box::new(move || run_task(&task, f, supervised)))?;
        self.shared.registry.insert(handle.clone());
        Ok(handle)
    }

    /// Run `f` on its own detached thread. The process may exit while it
    /// runs; `stop()` does not reach it.
    pub fn spawn_daemon<F>(&self, f: F) -> Result<DaemonHandle, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(SpawnError::ShutDown);
        }
        let n = self.shared.next_daemon.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.shared.config.daemon_name, n);
        let completion = Arc::new(Completion::default());
        let slot = completion.clone();
        let thread_name = name.clone();

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
                    Ok(()) => TaskOutcome::Completed,
                    Err(payload) => {
                        let msg = panic_message(payload);
                        tracing::debug!(daemon = %thread_name, panic = %msg, "daemon panicked");
                        TaskOutcome::Panicked(msg)
                    }
                };
                slot.set(outcome);
            })
            .map_err(|e| SpawnError::Thread(e.kind()))?;

        Ok(DaemonHandle { name, completion })
    }

    /// Cancel every registered task and clear the registry.
    pub fn stop(&self) {
        let handles = self.shared.registry.drain();
        tracing::debug!(tasks = handles.len(), "stopping registered tasks");
        for handle in &handles {
            handle.cancel();
        }
    }

    /// `stop()`, then close the pool and join its workers. Later spawns
    /// fail with `SpawnError::ShutDown`. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();
        self.shared.pool.shutdown();
        tracing::debug!("runtime shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire) || self.shared.pool.is_shut_down()
    }

    /// Number of handles currently registered.
    pub fn registered(&self) -> usize {
        self.shared.registry.len()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.shared.config)
            .field("registered", &self.registered())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Pool-side wrapper around a task body.
fn run_task<F>(handle: &TaskHandle, f: F, supervised: bool)
where
    F: FnOnce() -> Result<(), TaskError>,
{
    if handle.is_cancelled() {
        handle.completion.set(TaskOutcome::Cancelled);
        return;
    }

    let outcome = {
        let _current = cancel::enter(handle.token.clone());
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(TaskError::Interrupted)) => TaskOutcome::Cancelled,
            Ok(Err(err)) => {
                if supervised {
                    tracing::error!(task = handle.id, error = %err, "task failed");
                }
                TaskOutcome::Failed(err.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload);
                if supervised {
                    tracing::error!(task = handle.id, panic = %msg, "task panicked");
                } else {
                    tracing::debug!(task = handle.id, panic = %msg, "task panicked");
                }
                TaskOutcome::Panicked(msg)
            }
        }
    };
    handle.completion.set(outcome);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
