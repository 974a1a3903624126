//! # The cachefu two-level cache
//!
//! Caching is front and center in cachefu: the HTTP layer stores response
//! bodies through it, and the remote loader short-circuits fetches on it.
//! This module contains the cache tiers, the central [`CacheError`] type,
//! and the key-to-filename mapping.
//!
//! ## Cache Layers
//!
//! A [`Cache`] has two tiers:
//!
//! - An in-memory tier ([`MemoryStore`]) with a time-to-live measured from
//!   the last write. It tolerates concurrent access from any number of
//!   threads without caller-side locking.
//! - An optional disk tier ([`DiskStore`]) that persists entries as files
//!   named by [`filename_for_key`]. Disk entries expire by file mtime,
//!   checked lazily on read and eagerly by a sanitize sweep.
//!
//! A read goes through memory first. On miss, the disk tier is consulted;
//! a disk hit is promoted back into memory (read-through) before being
//! returned. A write goes to disk first, then memory (write-through); there
//! is no asynchronous write queue, so once `put` returns the entry is
//! durable (if the disk cooperated) and resident.
//!
//! Disk caching is strictly additive: disabling it leaves the memory tier
//! untouched, and re-enabling it picks up whatever files survived.
//!
//! ## Failure semantics
//!
//! The disk is never allowed to fail a caller. Unreadable or undecodable
//! files count as misses, and failed writes are logged and swallowed; the
//! value stays served from memory for the remainder of its TTL.
//!
//! ## Metrics
//!
//! Accesses emit counters tagged with the cache name: `caches.access`,
//! `caches.memory.hit`, `caches.file.hit`, and `caches.file.write`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;

mod error;
mod fs;
mod key;
mod memory;
#[cfg(test)]
mod tests;

pub use error::{CacheContents, CacheError};
pub use fs::DiskStore;
pub use key::{filename_for_key, filename_prefix};
pub use memory::MemoryStore;

/// De/serialization of cached values.
///
/// A [`Cache`] stores decoded items in memory and bytes on disk; the codec
/// bridges the two. Deserialization is fallible: a file that does not
/// decode is treated as a miss and removed.
pub trait CacheCodec: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    fn serialize(item: &Self::Item) -> CacheContents<Vec<u8>>;
    fn deserialize(bytes: &[u8]) -> CacheContents<Self::Item>;
}

/// The identity codec for raw byte payloads.
pub struct BytesCodec;

impl CacheCodec for BytesCodec {
    type Item = Bytes;

    fn serialize(item: &Self::Item) -> CacheContents<Vec<u8>> {
        Ok(item.to_vec())
    }

    fn deserialize(bytes: &[u8]) -> CacheContents<Self::Item> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// A cache of raw object bytes, as used by the remote loader.
pub type ObjectCache = Cache<BytesCodec>;

/// Tuning for one [`Cache`] instance.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Namespace; also the disk subdirectory under `<root>/cachefu/`.
    pub name: String,
    /// Sizing hint for the memory tier. Not an upper bound.
    pub initial_capacity: usize,
    /// Time-to-live for both tiers. `None` means entries never expire.
    pub ttl: Option<Duration>,
    /// Expected number of parallel accessors. Advisory only; the memory
    /// tier handles concurrency internally.
    pub concurrency_hint: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            name: "objects".into(),
            initial_capacity: 50,
            ttl: Some(Duration::from_secs(3600)),
            concurrency_hint: 4,
        }
    }
}

/// A two-level (memory + optional disk) object cache.
///
/// Cheap to share: loader jobs and the HTTP layer hold it behind an [`Arc`]
/// and call it concurrently. The memory tier needs no external locking, and
/// disk mutations serialize internally per instance.
pub struct Cache<C: CacheCodec> {
    name: String,
    ttl: Option<Duration>,
    memory: MemoryStore<C::Item>,
    disk: RwLock<Option<Arc<DiskStore>>>,
}

impl<C: CacheCodec> std::fmt::Debug for Cache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("in-memory items", &self.memory.entry_count())
            .field("disk", &self.disk.read().unwrap())
            .finish()
    }
}

impl<C: CacheCodec> Cache<C> {
    pub fn new(options: CacheOptions) -> Self {
        tracing::debug!(
            name = %options.name,
            concurrency_hint = options.concurrency_hint,
            "creating cache",
        );
        let memory = MemoryStore::new(&options.name, options.initial_capacity, options.ttl);

        Cache {
            name: options.name,
            ttl: options.ttl,
            memory,
            disk: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn disk(&self) -> Option<Arc<DiskStore>> {
        self.disk.read().unwrap().clone()
    }

    /// Enables write-through disk caching rooted at `root`.
    ///
    /// Creates the directory structure and the media-indexing sentinel, then
    /// sweeps already-expired files so stale entries do not outlive a
    /// process restart. Resident memory entries are unaffected.
    pub fn enable_disk_cache(&self, root: &Path) -> std::io::Result<()> {
        let store = DiskStore::open(root, &self.name, self.ttl)?;
        match store.sanitize() {
            Ok(removed) if removed > 0 => {
                tracing::debug!(cache = %self.name, removed, "sanitized expired cache files");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    cache = %self.name,
                    "failed to sanitize disk cache",
                );
            }
        }
        *self.disk.write().unwrap() = Some(Arc::new(store));
        Ok(())
    }

    /// Disables the disk tier. Already-cached memory entries stay valid, and
    /// files on disk stay where they are for a later re-enable.
    pub fn disable_disk_cache(&self) {
        *self.disk.write().unwrap() = None;
    }

    pub fn is_disk_cache_enabled(&self) -> bool {
        self.disk.read().unwrap().is_some()
    }

    /// The directory backing the disk tier, if enabled.
    pub fn disk_cache_dir(&self) -> Option<PathBuf> {
        self.disk().map(|store| store.dir().to_owned())
    }

    /// Looks up `key`, memory tier first, then disk (promoting a hit back
    /// into memory).
    pub fn get(&self, key: &str) -> Option<C::Item> {
        metric!(counter("caches.access") += 1, "cache" => &self.name);

        if let Some(item) = self.memory.get(key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => &self.name);
            return Some(item);
        }

        let store = self.disk()?;
        let bytes = store.read(key)?;
        match C::deserialize(&bytes) {
            Ok(item) => {
                metric!(counter("caches.file.hit") += 1, "cache" => &self.name);
                self.memory.insert(key.to_owned(), item.clone());
                Some(item)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    cache = %self.name,
                    key,
                    "discarding undecodable cache file",
                );
                if let Err(e) = store.remove(key) {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        cache = %self.name,
                        "failed to remove undecodable cache file",
                    );
                }
                None
            }
        }
    }

    /// Looks up `key` in the memory tier only.
    ///
    /// This is the latency-sensitive variant the loader uses to decide
    /// whether it can complete a request synchronously; it never touches
    /// the disk.
    pub fn get_memory(&self, key: &str) -> Option<C::Item> {
        self.memory.get(key)
    }

    /// Stores `value` under `key`, writing through to disk if enabled.
    ///
    /// Returns the value previously resident in the *memory* tier; disk is
    /// not consulted for the previous value since the write-through has
    /// already overwritten it.
    pub fn put(&self, key: &str, value: C::Item) -> Option<C::Item> {
        if let Some(store) = self.disk() {
            metric!(counter("caches.file.write") += 1, "cache" => &self.name);
            match C::serialize(&value) {
                Ok(bytes) => {
                    if let Err(e) = store.write(key, &bytes) {
                        tracing::error!(
                            error = &e as &dyn std::error::Error,
                            cache = %self.name,
                            key,
                            "failed to write cache file",
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, cache = %self.name, key, "failed to serialize cache entry");
                }
            }
        }
        self.memory.insert(key.to_owned(), value)
    }

    /// Whether `key` is resident in memory or present as a non-expired file
    /// on disk.
    pub fn contains_key(&self, key: &str) -> bool {
        if self.memory.contains_key(key) {
            return true;
        }
        self.disk().is_some_and(|store| store.contains(key))
    }

    /// Removes `key` from both tiers, returning the previously resident
    /// memory value.
    pub fn remove(&self, key: &str) -> Option<C::Item> {
        if let Some(store) = self.disk() {
            if let Err(e) = store.remove(key) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    cache = %self.name,
                    key,
                    "failed to remove cache file",
                );
            }
        }
        self.memory.remove(key)
    }

    /// Clears the memory tier, and the disk tier too if `wipe_disk` is set.
    pub fn clear(&self, wipe_disk: bool) {
        self.memory.clear();
        if !wipe_disk {
            return;
        }
        if let Some(store) = self.disk() {
            if let Err(e) = store.clear() {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    cache = %self.name,
                    "failed to clear disk cache",
                );
            }
        }
    }

    /// Removes every entry whose raw key starts with `prefix` from memory,
    /// and every disk file whose name starts with the mapped prefix.
    ///
    /// Returns the number of removed memory entries.
    pub fn remove_all_with_prefix(&self, prefix: &str) -> usize {
        if let Some(store) = self.disk() {
            if let Err(e) = store.remove_prefix(prefix) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    cache = %self.name,
                    prefix,
                    "failed to remove cache files by prefix",
                );
            }
        }
        self.memory.remove_prefix(prefix)
    }

    /// Eagerly deletes expired disk entries. Returns how many were removed.
    pub fn sanitize_disk_cache(&self) -> usize {
        let Some(store) = self.disk() else { return 0 };
        match store.sanitize() {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    cache = %self.name,
                    "failed to sanitize disk cache",
                );
                0
            }
        }
    }
}
