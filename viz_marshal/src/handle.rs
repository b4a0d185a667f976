use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Opaque identifier for one window/session. Never reused by the engine that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// Rebuilds a handle from its integer form, e.g. one passed through an
    /// FFI boundary. Lookups with a value the engine never issued fail with
    /// an invalid-handle error.
    pub fn from_raw(value: u32) -> Self {
        Handle(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared, monotonically increasing handle source. Outlives individual owner
/// threads so handles stay unique across engine restarts.
#[derive(Debug, Clone)]
pub(crate) struct HandleCounter {
    next: Arc<AtomicU32>,
}

impl HandleCounter {
    pub fn new() -> Self {
        HandleCounter {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Next unused handle, or `None` once the integer space is used up.
    /// Handles are never wrapped around and reissued.
    fn allocate(&self) -> Option<Handle> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .ok()
            .map(Handle)
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32) -> Self {
        HandleCounter {
            next: Arc::new(AtomicU32::new(next)),
        }
    }
}

/// Maps handles to the objects they own. Only ever touched by the owner
/// thread, so it carries no synchronisation of its own.
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    counter: HandleCounter,
    entries: BTreeMap<Handle, T>,
}

impl<T> HandleTable<T> {
    pub fn new(counter: HandleCounter) -> Self {
        HandleTable {
            counter,
            entries: BTreeMap::new(),
        }
    }

    /// Stores `value` under a fresh handle. Hands the value back when no
    /// handle is left.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        let Some(handle) = self.counter.allocate() else {
            return Err(value);
        };
        self.entries.insert(handle, value);
        Ok(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.entries.keys().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
