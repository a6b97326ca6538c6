use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bounded, time-limited in-memory cache for tenant configuration and
/// permission lookups. Invalidation is pull-based: write paths call
/// [`TtlCache::invalidate`] synchronously after commit. There is no event
/// hook or subscription mechanism.
pub struct TtlCache<K, V> {
    inner: Mutex<State<K, V>>,
    capacity: usize,
    ttl: Duration,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    next_seq: u64,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
    seq: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(State {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.inner.lock().expect("cache poisoned");
        let hit = match state.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => None, // expired
            None => return None,
        };
        if hit.is_none() {
            state.entries.remove(key);
        }
        hit
    }

    pub fn put(&self, key: K, value: V) {
        let mut state = self.inner.lock().expect("cache poisoned");
        if state.entries.len() >= self.capacity && !state.entries.contains_key(&key) {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
                seq,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.lock().expect("cache poisoned").entries.remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache poisoned").entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_within_ttl() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = TtlCache::new(4, Duration::ZERO);
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn invalidate_removes_single_key() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
