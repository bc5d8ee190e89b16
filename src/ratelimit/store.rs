//! Capacity-bounded LRU store of limiter entries.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::bucket::Limit;
use super::entry::{LimiterEntry, SharedEntry};
use crate::error::{Result, ThrottledError};

/// Receives a notification each time the store evicts an entry to make room.
///
/// Invoked synchronously on the thread that triggered the eviction, after the store's
/// lock has been released.
pub trait EvictionListener: Send + Sync {
    fn on_evict(&self, key: &str);
}

/// How [`LimiterStore::get_or_create`] resolved a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The key existed with the requested limit
    Existing,
    /// The key was not present; a new entry was inserted with the caller's token already taken
    Created,
    /// The key existed with a different limit; its entry was replaced with the caller's token
    /// already taken
    Renewed,
}

struct Slot {
    entry: SharedEntry,
    /// Limit the entry was created with, for drift detection
    limit: Limit,
}

/// A concurrent map from key to limiter entry holding at most `capacity` entries.
///
/// Structural changes (insert, replace, evict) and recency updates are serialized by one
/// store-wide lock. Token operations happen on the entry's own lock, outside the store lock.
pub struct LimiterStore {
    cache: Mutex<LruCache<String, Slot>>,
    listener: Arc<dyn EvictionListener>,
}

impl LimiterStore {
    /// Create a store that notifies `listener` of capacity evictions.
    ///
    /// A zero capacity is a configuration error.
    pub fn new(capacity: usize, listener: Arc<dyn EvictionListener>) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| ThrottledError::Config("store capacity must be positive".to_string()))?;
        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            listener,
        })
    }

    /// Look up `key`, creating or renewing its entry as needed.
    ///
    /// The returned entry becomes the most recently used. A created or renewed entry is
    /// published with the caller's token already taken, so no other caller can claim it first.
    /// A renewal replaces the entry in place and never counts as an eviction.
    pub fn get_or_create(
        &self,
        key: &str,
        limit: Limit,
        now: Instant,
    ) -> Result<(SharedEntry, Lookup)> {
        let mut evicted = None;

        let result = {
            let mut cache = self.cache.lock();

            if let Some(slot) = cache.get_mut(key) {
                if slot.limit == limit {
                    trace!(key = %key, "Limiter hit");
                    (Arc::clone(&slot.entry), Lookup::Existing)
                } else {
                    let entry = LimiterEntry::shared(key, limit, now);
                    debug!(key = %key, from = %slot.limit, to = %limit, "Renewing limiter");
                    slot.entry = Arc::clone(&entry);
                    slot.limit = limit;
                    (entry, Lookup::Renewed)
                }
            } else {
                let owned = owned_key(key)?;
                let entry = LimiterEntry::shared(key, limit, now);
                let slot = Slot {
                    entry: Arc::clone(&entry),
                    limit,
                };
                if let Some((old, _)) = cache.push(owned, slot) {
                    if old != key {
                        evicted = Some(old);
                    }
                }
                debug!(key = %key, limit = %limit, "Created limiter");
                (entry, Lookup::Created)
            }
        };

        if let Some(key) = evicted {
            debug!(key = %key, "Evicted least recently used limiter");
            self.listener.on_evict(&key);
        }

        Ok(result)
    }

    /// Whether `key` is present, without affecting recency.
    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.lock().contains(key)
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

/// Copy `key` for storage, reporting allocation failure instead of aborting.
fn owned_key(key: &str) -> Result<String> {
    let mut owned = String::new();
    owned.try_reserve_exact(key.len()).map_err(|e| {
        ThrottledError::Internal(format!("failed to allocate limiter for {}: {}", key, e))
    })?;
    owned.push_str(key);
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingListener {
        evicted: Mutex<Vec<String>>,
        count: AtomicUsize,
    }

    impl EvictionListener for RecordingListener {
        fn on_evict(&self, key: &str) {
            self.evicted.lock().push(key.to_string());
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn limit(rate: f64, burst: u32) -> Limit {
        Limit::new(rate, burst).unwrap()
    }

    fn store_with_listener(capacity: usize) -> (LimiterStore, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let store = LimiterStore::new(capacity, listener.clone()).unwrap();
        (store, listener)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = LimiterStore::new(0, Arc::new(RecordingListener::default()));
        assert!(matches!(result, Err(ThrottledError::Config(_))));
    }

    #[test]
    fn test_get_or_create_lifecycle() {
        let (store, _) = store_with_listener(10);
        let now = Instant::now();

        let (_, lookup) = store.get_or_create("a", limit(1.0, 1), now).unwrap();
        assert_eq!(lookup, Lookup::Created);
        let (_, lookup) = store.get_or_create("a", limit(1.0, 1), now).unwrap();
        assert_eq!(lookup, Lookup::Existing);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_existing_entry_is_shared() {
        let (store, _) = store_with_listener(10);
        let now = Instant::now();

        let (first, _) = store.get_or_create("a", limit(1.0, 2), now).unwrap();
        assert!(first.lock().try_acquire(now));

        let (second, _) = store.get_or_create("a", limit(1.0, 2), now).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.lock().try_acquire(now));
    }

    #[test]
    fn test_created_entry_holds_creators_token() {
        let (store, _) = store_with_listener(10);
        let now = Instant::now();

        let (creator, lookup) = store.get_or_create("k", limit(0.0001, 1), now).unwrap();
        assert_eq!(lookup, Lookup::Created);

        // A second caller arriving before the creator touches its entry finds it drained
        let (other, lookup) = store.get_or_create("k", limit(0.0001, 1), now).unwrap();
        assert_eq!(lookup, Lookup::Existing);
        assert!(Arc::ptr_eq(&creator, &other));
        assert!(!other.lock().try_acquire(now));

        let (renewed, lookup) = store.get_or_create("k", limit(0.0001, 2), now).unwrap();
        assert_eq!(lookup, Lookup::Renewed);
        let (other, _) = store.get_or_create("k", limit(0.0001, 2), now).unwrap();
        assert!(Arc::ptr_eq(&renewed, &other));
        assert!(other.lock().try_acquire(now));
        assert!(!other.lock().try_acquire(now));
    }

    #[test]
    fn test_renewal_replaces_bucket() {
        let (store, listener) = store_with_listener(10);
        let now = Instant::now();

        let (old, _) = store.get_or_create("a", limit(1.0, 1), now).unwrap();
        assert!(!old.lock().try_acquire(now));

        let (renewed, lookup) = store.get_or_create("a", limit(5.0, 3), now).unwrap();
        assert_eq!(lookup, Lookup::Renewed);
        assert!(!Arc::ptr_eq(&old, &renewed));
        assert_eq!(renewed.lock().limit(), limit(5.0, 3));
        assert_eq!(renewed.lock().available(now), 2.0);

        // Renewal is neither a new key nor an eviction
        assert_eq!(store.len(), 1);
        assert_eq!(listener.count.load(Ordering::SeqCst), 0);

        let (_, lookup) = store.get_or_create("a", limit(5.0, 3), now).unwrap();
        assert_eq!(lookup, Lookup::Existing);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let (store, listener) = store_with_listener(3);
        let now = Instant::now();

        for key in ["a", "b", "c", "d"] {
            store.get_or_create(key, limit(1.0, 1), now).unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(!store.contains("a"));
        assert_eq!(*listener.evicted.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let (store, listener) = store_with_listener(3);
        let now = Instant::now();

        for key in ["a", "b", "c"] {
            store.get_or_create(key, limit(1.0, 1), now).unwrap();
        }
        store.get_or_create("a", limit(1.0, 1), now).unwrap();
        store.get_or_create("b", limit(1.0, 1), now).unwrap();
        store.get_or_create("d", limit(1.0, 1), now).unwrap();

        assert!(store.contains("a"));
        assert!(store.contains("b"));
        assert!(!store.contains("c"));
        assert_eq!(*listener.evicted.lock(), vec!["c".to_string()]);
    }

    #[test]
    fn test_renewal_refreshes_recency() {
        let (store, listener) = store_with_listener(2);
        let now = Instant::now();

        store.get_or_create("a", limit(1.0, 1), now).unwrap();
        store.get_or_create("b", limit(1.0, 1), now).unwrap();
        store.get_or_create("a", limit(2.0, 1), now).unwrap();
        store.get_or_create("c", limit(1.0, 1), now).unwrap();

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_reenter_store() {
        struct Reentrant(Mutex<Option<Arc<LimiterStore>>>);

        impl EvictionListener for Reentrant {
            fn on_evict(&self, key: &str) {
                if let Some(store) = self.0.lock().as_ref() {
                    assert!(!store.contains(key));
                    assert_eq!(store.len(), store.capacity());
                }
            }
        }

        let listener = Arc::new(Reentrant(Mutex::new(None)));
        let store = Arc::new(LimiterStore::new(1, listener.clone()).unwrap());
        *listener.0.lock() = Some(Arc::clone(&store));

        let now = Instant::now();
        store.get_or_create("a", limit(1.0, 1), now).unwrap();
        store.get_or_create("b", limit(1.0, 1), now).unwrap();
        assert!(store.contains("b"));

        // Break the reference cycle
        listener.0.lock().take();
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let (store, listener) = store_with_listener(16);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", t, i);
                        store.get_or_create(&key, limit(1.0, 1), Instant::now()).unwrap();
                        assert!(store.len() <= 16);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 16);
        assert_eq!(listener.count.load(Ordering::SeqCst), 800 - 16);
    }
}
