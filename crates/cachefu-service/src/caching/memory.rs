use std::time::Duration;

/// The in-memory tier of a two-level cache.
///
/// This is a thin wrapper around a [`moka::sync::Cache`] and inherits its
/// concurrency guarantees: `get`/`insert`/`remove` are safe to call from any
/// number of threads without external locking.
///
/// Entries expire on a fixed time-to-live measured from the last *write*
/// (insert or overwrite), not from the last read. An absent TTL means
/// entries never expire.
pub struct MemoryStore<T> {
    cache: moka::sync::Cache<String, T>,
}

impl<T: Clone + Send + Sync + 'static> MemoryStore<T> {
    /// Creates a store with the given sizing hint and TTL.
    ///
    /// `initial_capacity` pre-sizes the underlying map; it is not an upper
    /// bound, so freshly inserted entries are always retrievable until they
    /// expire.
    pub fn new(name: &str, initial_capacity: usize, ttl: Option<Duration>) -> Self {
        let mut builder = moka::sync::Cache::builder()
            .name(name)
            .initial_capacity(initial_capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        MemoryStore {
            cache: builder.build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.cache.get(key)
    }

    /// Inserts `value` under `key`, returning the previously resident value.
    pub fn insert(&self, key: String, value: T) -> Option<T> {
        let previous = self.cache.get(&key);
        self.cache.insert(key, value);
        previous
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.cache.remove(key)
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Removes every entry whose raw key starts with `prefix`.
    ///
    /// Returns the number of removed entries.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<_> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key.as_str()).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
