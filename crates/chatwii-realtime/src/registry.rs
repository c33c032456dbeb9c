//! Active listener tracking.
//!
//! Every realtime listener the client opens is registered here under a key
//! (the listened path tagged with the owning hook's id). Registering under an
//! existing key first releases the old listener, so a key never maps to more
//! than one live subscription. Teardown on sign-out or conversation switch
//! goes through [`ListenerRegistry::clear`] and
//! [`ListenerRegistry::remove_where`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::Subscription;

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Subscription>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `subscription` under `key`, releasing whatever was there.
    pub fn register(&self, key: impl Into<String>, subscription: Subscription) {
        let key = key.into();
        let previous = self.lock().insert(key.clone(), subscription);
        if let Some(previous) = previous {
            debug!(key = %key, "Replacing existing listener");
            release(&key, previous);
        } else {
            debug!(key = %key, "Registered listener");
        }
    }

    /// Release the listener under `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(subscription) => {
                release(key, subscription);
                true
            }
            None => false,
        }
    }

    /// Release every listener whose key matches `predicate`.
    pub fn remove_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let removed: Vec<(String, Subscription)> = {
            let mut listeners = self.lock();
            let keys: Vec<String> = listeners
                .keys()
                .filter(|k| predicate(k.as_str()))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| listeners.remove(&k).map(|s| (k, s)))
                .collect()
        };
        let count = removed.len();
        for (key, subscription) in removed {
            release(&key, subscription);
        }
        count
    }

    /// Release every listener whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        self.remove_where(|key| key.starts_with(prefix))
    }

    /// Release everything. Used on sign-out.
    pub fn clear(&self) -> usize {
        let drained: Vec<(String, Subscription)> = self.lock().drain().collect();
        let count = drained.len();
        for (key, subscription) in drained {
            release(&key, subscription);
        }
        if count > 0 {
            debug!(count, "Cleared listener registry");
        }
        count
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

// Unsubscribe outside the map lock: a backend may call back into us.
fn release(key: &str, subscription: Subscription) {
    if let Err(e) = subscription.unsubscribe() {
        warn!(key = %key, error = %e, "Failed to release listener");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(path: &str, released: &Arc<AtomicUsize>) -> Subscription {
        let released = released.clone();
        Subscription::new(path, move || {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_register_and_remove() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());

        registry.register("messages/a_b", counted("messages/a_b", &released));
        assert!(registry.contains("messages/a_b"));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("messages/a_b"));
        assert!(!registry.remove("messages/a_b"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_same_key_releases_previous() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();

        registry.register("typing/a_b", counted("typing/a_b", &released));
        registry.register("typing/a_b", counted("typing/a_b", &released));

        assert_eq!(registry.len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_where_and_clear() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();
        for key in ["messages/a_b", "reactions/a_b", "typing/a_b", "presence", "messages/a_c"] {
            registry.register(key, counted(key, &released));
        }

        assert_eq!(registry.remove_where(|k| k.ends_with("/a_b")), 3);
        assert_eq!(registry.keys(), vec!["messages/a_c", "presence"]);

        assert_eq!(registry.remove_prefix("messages/"), 1);
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 5);
    }
}
