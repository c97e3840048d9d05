// MIT License
// Copyright 2023--present liaison developers

//! Remote handle → live instance table.
//!
//! Handles come from a monotonic counter and are never recycled within one
//! process run. Lookups take a read lock; inserts and removals take the write
//! lock, so they exclude every other access to the table while they run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::wire::RemoteHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no live instance for handle {0}")]
    NotFound(RemoteHandle),
    #[error("handle {0} is already bound to an instance")]
    Duplicate(RemoteHandle),
}

/// Table of live instances keyed by [`RemoteHandle`].
///
/// Entries are shared as `Arc<T>` so a call in flight keeps its instance alive
/// even if another thread removes the entry meanwhile.
pub struct InstanceRegistry<T> {
    next: AtomicU64,
    entries: RwLock<HashMap<RemoteHandle, Arc<T>>>,
}

impl<T> Default for InstanceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InstanceRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reserve a fresh handle. Handle `0` is never issued.
    pub fn allocate_handle(&self) -> RemoteHandle {
        RemoteHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, handle: RemoteHandle, instance: T) -> Result<Arc<T>, RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&handle) {
            return Err(RegistryError::Duplicate(handle));
        }
        let instance = Arc::new(instance);
        entries.insert(handle, Arc::clone(&instance));
        Ok(instance)
    }

    pub fn get(&self, handle: RemoteHandle) -> Result<Arc<T>, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&handle)
            .cloned()
            .ok_or(RegistryError::NotFound(handle))
    }

    /// Remove an entry. An absent handle is reported and otherwise ignored.
    pub fn remove(&self, handle: RemoteHandle) -> Option<Arc<T>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let removed = entries.remove(&handle);
        if removed.is_none() {
            tracing::warn!(%handle, "remove: handle is not registered");
        }
        removed
    }

    /// Remove and return every entry, in handle order.
    pub fn drain(&self) -> Vec<(RemoteHandle, Arc<T>)> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut drained: Vec<_> = entries.drain().collect();
        drained.sort_by_key(|(handle, _)| *handle);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_monotonic() {
        let registry = InstanceRegistry::<()>::new();
        let a = registry.allocate_handle();
        let b = registry.allocate_handle();
        assert!(b > a);
        assert_ne!(a, RemoteHandle(0));
    }

    #[test]
    fn insert_get_remove() {
        let registry = InstanceRegistry::new();
        let handle = registry.allocate_handle();
        registry.insert(handle, "bouncing ball").unwrap();
        assert_eq!(*registry.get(handle).unwrap(), "bouncing ball");
        assert!(registry.remove(handle).is_some());
        assert_eq!(registry.get(handle).unwrap_err(), RegistryError::NotFound(handle));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let registry = InstanceRegistry::new();
        let handle = registry.allocate_handle();
        registry.insert(handle, 1).unwrap();
        assert_eq!(
            registry.insert(handle, 2).unwrap_err(),
            RegistryError::Duplicate(handle)
        );
        assert_eq!(*registry.get(handle).unwrap(), 1);
    }

    #[test]
    fn removing_absent_handle_is_not_fatal() {
        let registry = InstanceRegistry::<u8>::new();
        assert!(registry.remove(RemoteHandle(42)).is_none());
    }

    #[test]
    fn handles_are_not_recycled() {
        let registry = InstanceRegistry::new();
        let first = registry.allocate_handle();
        registry.insert(first, ()).unwrap();
        registry.remove(first);
        let second = registry.allocate_handle();
        assert_ne!(first, second);
    }

    #[test]
    fn drain_returns_entries_in_order() {
        let registry = InstanceRegistry::new();
        for name in ["a", "b", "c"] {
            let handle = registry.allocate_handle();
            registry.insert(handle, name).unwrap();
        }
        let drained: Vec<_> = registry.drain().into_iter().map(|(_, v)| *v).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(registry.is_empty());
    }
}
