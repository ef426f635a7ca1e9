//! Concurrency-safe keyed stores for chips and lines.
//!
//! [`Registry`] is a `BTreeMap` behind a single `parking_lot` mutex. The lock
//! covers the map access only: it is never held across a driver call, never
//! held while a `Line` or `Chip` lock is being acquired, and
//! [`Registry::for_each`] iterates a snapshot, so the callback may re-enter
//! the registry freely.
//!
//! Values are shared handles (`Arc`s). [`Registry::remove_if_same`] removes an
//! entry only when it still points at the caller's instance, so a torn-down
//! line can never evict a fresh line that was registered under the same key.

use crate::chip::Chip;
use crate::line::Line;
use linegate_core::types::LineKey;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use thiserror::Error;

/// Registry misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The key is already present.
    #[error("'{0}' is already registered")]
    Duplicate(String),
    /// The key is absent.
    #[error("'{0}' is not registered")]
    NotFound(String),
}

/// Keyed store with snapshot traversal.
pub struct Registry<K, V> {
    name: &'static str,
    entries: Mutex<BTreeMap<K, V>>,
}

/// Live lines keyed by chip name and offset.
pub type LineRegistry = Registry<LineKey, Arc<Line>>;

/// Open chips keyed by chip name.
pub type ChipRegistry = Registry<String, Arc<Chip>>;

impl<K, V> Debug for Registry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl<K, V> Registry<K, V>
where
    K: Ord + Clone + Display,
    V: Clone,
{
    /// Empty registry; `name` only appears in log records.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert `value` unless `key` is present.
    pub fn add(&self, key: K, value: V) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(RegistryError::Duplicate(key.to_string()));
        }
        tracing::trace!(registry = self.name, key = %key, "Registered");
        entries.insert(key, value);
        Ok(())
    }

    /// Look up `key`.
    pub fn get(&self, key: &K) -> Result<V, RegistryError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the registry holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every entry, in key order.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Call `f` for every entry present when the traversal started.
    ///
    /// The lock is released before the first call.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (key, value) in self.snapshot() {
            f(&key, &value);
        }
    }
}

impl<K, T> Registry<K, Arc<T>>
where
    K: Ord + Clone + Display,
{
    /// Remove `key` only if it still maps to `value` (pointer identity).
    pub fn remove_if_same(&self, key: &K, value: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(current) if Arc::ptr_eq(current, value) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry<String, Arc<u32>> {
        Registry::new("test")
    }

    #[test]
    fn test_add_get_delete() {
        let reg = registry();
        reg.add("a".into(), Arc::new(1)).unwrap();
        assert_eq!(*reg.get(&"a".to_string()).unwrap(), 1);
        assert_eq!(
            reg.add("a".into(), Arc::new(2)),
            Err(RegistryError::Duplicate("a".into()))
        );
        assert!(reg.delete(&"a".to_string()).is_some());
        assert!(reg.delete(&"a".to_string()).is_none());
        assert_eq!(
            reg.get(&"a".to_string()).unwrap_err(),
            RegistryError::NotFound("a".into())
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_if_same_checks_identity() {
        let reg = registry();
        let old = Arc::new(1);
        let new = Arc::new(1);
        reg.add("a".into(), new.clone()).unwrap();
        assert!(!reg.remove_if_same(&"a".to_string(), &old));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove_if_same(&"a".to_string(), &new));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_for_each_may_reenter() {
        let reg = registry();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            reg.add(key.to_string(), Arc::new(i as u32)).unwrap();
        }
        let mut seen = Vec::new();
        reg.for_each(|key, _| {
            // Would deadlock if the lock were held during traversal.
            reg.delete(key);
            seen.push(key.clone());
        });
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(reg.is_empty());
    }
}
