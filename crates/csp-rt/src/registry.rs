// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Registry of cancellable tasks.
//!
//! Insert and drain-all are the only mutations. Handles are never removed
//! one at a time; `Runtime::stop` takes the whole set at once.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::spawn::TaskHandle;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    handles: Mutex<Vec<TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: TaskHandle) {
        self.lock().push(handle);
    }

    /// Take every registered handle, leaving the registry empty.
    ///
    /// A concurrent `insert` lands either in the returned batch or in the
    /// fresh registry, never both.
    pub fn drain(&self) -> Vec<TaskHandle> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
