//! Controller-owned registry of long-lived per-key services (for example one correlator per target).

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::debug;

type Teardown<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// Keyed service registry with explicit lifecycle.
///
/// [`ensure`](Registry::ensure) creates an entry on first use; [`invalidate`](Registry::invalidate)
/// removes it and runs the teardown hook, if one is installed.
pub struct Registry<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
    teardown: Option<Teardown<K, V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            teardown: None,
        }
    }

    /// Run `f` on every entry removed through `invalidate`/`invalidate_all`.
    pub fn with_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.teardown = Some(Box::new(f));
        self
    }

    /// Return the entry for `key`, creating it with `factory` when absent.
    pub fn ensure<F>(&self, key: &K, factory: F) -> Arc<V>
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(v) = self.get(key) {
            return v;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Raced with another ensure between the read and the write lock.
        if let Some(v) = entries.get(key) {
            return Arc::clone(v);
        }
        debug!(?key, "registry entry created");
        let v = Arc::new(factory(key));
        entries.insert(key.clone(), Arc::clone(&v));
        v
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;

        debug!(?key, "registry entry invalidated");
        if let Some(teardown) = &self.teardown {
            teardown(key, &removed);
        }
        Some(removed)
    }

    pub fn invalidate_all(&self) -> usize {
        let drained: Vec<(K, Arc<V>)> = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        if let Some(teardown) = &self.teardown {
            for (k, v) in &drained {
                teardown(k, v);
            }
        }
        drained.len()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn ensure_creates_once() {
        let reg: Registry<String, usize> = Registry::new();
        let calls = AtomicUsize::new(0);

        let a = reg.ensure(&"site-a".to_string(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            1
        });
        let b = reg.ensure(&"site-a".to_string(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            2
        });

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn invalidate_runs_teardown_and_allows_recreate() {
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = torn.clone();
        let reg: Registry<&'static str, u32> = Registry::new().with_teardown(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reg.ensure(&"a", |_| 1);
        reg.ensure(&"b", |_| 2);
        assert_eq!(reg.invalidate(&"a").as_deref(), Some(&1));
        assert!(reg.invalidate(&"a").is_none());
        assert_eq!(torn.load(Ordering::SeqCst), 1);

        assert_eq!(*reg.ensure(&"a", |_| 10), 10);
        assert_eq!(reg.invalidate_all(), 2);
        assert_eq!(torn.load(Ordering::SeqCst), 3);
        assert!(reg.is_empty());
    }
}
