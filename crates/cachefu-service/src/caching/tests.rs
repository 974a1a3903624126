use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use cachefu_test as test_support;

use super::*;
use crate::http::{CachedResponse, ResponseCache, ResponseCodec};

fn cache(ttl: Option<Duration>) -> ObjectCache {
    ObjectCache::new(CacheOptions {
        ttl,
        ..Default::default()
    })
}

fn entry_path(cache: &ObjectCache, key: &str) -> PathBuf {
    cache
        .disk_cache_dir()
        .expect("disk cache not enabled")
        .join(filename_for_key(key))
}

fn backdate(path: &Path, age: Duration) {
    let mtime = filetime::FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(path, mtime).unwrap();
}

#[test]
fn test_memory_only_roundtrip() {
    test_support::setup();
    let cache = cache(None);

    assert_eq!(cache.put("k", Bytes::from_static(b"v")), None);
    assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));
    assert!(cache.disk_cache_dir().is_none());

    cache.clear(false);
    assert_eq!(cache.get("k"), None);
}

#[test]
fn test_put_returns_previous_value() {
    test_support::setup();
    let cache = cache(None);

    assert_eq!(cache.put("k", Bytes::from_static(b"one")), None);
    assert_eq!(
        cache.put("k", Bytes::from_static(b"two")),
        Some(Bytes::from_static(b"one"))
    );
    assert_eq!(cache.get("k"), Some(Bytes::from_static(b"two")));
}

#[test]
fn test_write_through_survives_restart() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let first = cache(None);
    first.enable_disk_cache(cache_dir.path()).unwrap();
    first.put("http://a.com/x.png", Bytes::from_static(b"pixels"));

    let path = entry_path(&first, "http://a.com/x.png");
    assert!(path.ends_with("http+a+com+x+png"));
    assert_eq!(fs::read(&path).unwrap(), b"pixels");

    // A fresh instance starts with an empty memory tier, like after a
    // process restart.
    let second = cache(None);
    second.enable_disk_cache(cache_dir.path()).unwrap();
    assert_eq!(second.get_memory("http://a.com/x.png"), None);
    assert_eq!(
        second.get("http://a.com/x.png"),
        Some(Bytes::from_static(b"pixels"))
    );
    // the disk hit was promoted back into memory
    assert_eq!(
        second.get_memory("http://a.com/x.png"),
        Some(Bytes::from_static(b"pixels"))
    );
}

#[test]
fn test_contains_key_consults_disk() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let first = cache(None);
    first.enable_disk_cache(cache_dir.path()).unwrap();
    first.put("k", Bytes::from_static(b"v"));

    let second = cache(None);
    second.enable_disk_cache(cache_dir.path()).unwrap();
    assert!(second.contains_key("k"));
    assert_eq!(second.get_memory("k"), None);
    assert!(!second.contains_key("missing"));
}

#[test]
fn test_memory_expiry() {
    test_support::setup();
    let cache = cache(Some(Duration::from_millis(150)));

    cache.put("k", Bytes::from_static(b"v"));
    sleep(Duration::from_millis(100));
    assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));

    sleep(Duration::from_millis(200));
    assert_eq!(cache.get("k"), None);
}

#[test]
fn test_disk_expiry_deletes_lazily() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(Some(Duration::from_secs(3600)));
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("k", Bytes::from_static(b"v"));

    let path = entry_path(&cache, "k");
    backdate(&path, Duration::from_secs(7200));

    // A fresh instance bypasses the still-valid memory entry.
    let fresh = self::cache(Some(Duration::from_secs(3600)));
    fresh.enable_disk_cache(cache_dir.path()).unwrap();
    assert_eq!(fresh.get("k"), None);
    assert!(!path.exists());
}

#[test]
fn test_sanitize_sweeps_expired_files() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(Some(Duration::from_secs(3600)));
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("old", Bytes::from_static(b"old"));
    cache.put("new", Bytes::from_static(b"new"));

    backdate(&entry_path(&cache, "old"), Duration::from_secs(7200));

    assert_eq!(cache.sanitize_disk_cache(), 1);
    assert!(!entry_path(&cache, "old").exists());
    assert!(entry_path(&cache, "new").exists());
}

#[test]
fn test_enable_disk_cache_sanitizes() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let first = cache(Some(Duration::from_secs(3600)));
    first.enable_disk_cache(cache_dir.path()).unwrap();
    first.put("stale", Bytes::from_static(b"stale"));
    let path = entry_path(&first, "stale");
    backdate(&path, Duration::from_secs(7200));

    // enabling sweeps files that expired since the last run
    let second = cache(Some(Duration::from_secs(3600)));
    second.enable_disk_cache(cache_dir.path()).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_clear_keeps_sentinel() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("a", Bytes::from_static(b"a"));
    cache.put("b", Bytes::from_static(b"b"));

    cache.clear(true);

    assert_eq!(cache.get("a"), None);
    let dir = cache.disk_cache_dir().unwrap();
    let names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec![".nomedia"]);
}

#[test]
fn test_disk_toggle() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    assert!(cache.is_disk_cache_enabled());
    cache.put("durable", Bytes::from_static(b"durable"));
    let durable_path = entry_path(&cache, "durable");

    cache.disable_disk_cache();
    assert!(!cache.is_disk_cache_enabled());
    cache.put("volatile", Bytes::from_static(b"volatile"));

    // memory entries from before the toggle stay valid
    assert_eq!(cache.get("durable"), Some(Bytes::from_static(b"durable")));
    assert_eq!(cache.get("volatile"), Some(Bytes::from_static(b"volatile")));

    // the durable file survived the toggle, the volatile one was never written
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    assert!(durable_path.exists());
    assert!(!entry_path(&cache, "volatile").exists());
}

#[test]
fn test_remove_all_with_prefix() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("http://x.com/a", Bytes::from_static(b"a"));
    cache.put("http://x.com/b", Bytes::from_static(b"b"));
    cache.put("http://y.com/c", Bytes::from_static(b"c"));

    assert_eq!(cache.remove_all_with_prefix("http://x.com/"), 2);

    assert_eq!(cache.get("http://x.com/a"), None);
    assert_eq!(cache.get("http://y.com/c"), Some(Bytes::from_static(b"c")));
    assert!(!entry_path(&cache, "http://x.com/a").exists());
    assert!(entry_path(&cache, "http://y.com/c").exists());
}

#[test]
fn test_remove_clears_both_tiers() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("k", Bytes::from_static(b"v"));

    assert_eq!(cache.remove("k"), Some(Bytes::from_static(b"v")));
    assert_eq!(cache.get("k"), None);
    assert!(!entry_path(&cache, "k").exists());
}

#[test]
fn test_undecodable_file_is_a_miss() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache: ResponseCache = ResponseCache::new(CacheOptions::default());
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put(
        "http://a.com/page",
        CachedResponse {
            status: 200,
            body: Bytes::from_static(b"body"),
        },
    );

    // corrupt the record on disk to less than a status code
    let path = cache
        .disk_cache_dir()
        .unwrap()
        .join(filename_for_key("http://a.com/page"));
    fs::write(&path, b"\x00").unwrap();

    // a fresh instance has to go through the corrupted file
    let fresh: ResponseCache = ResponseCache::new(CacheOptions::default());
    fresh.enable_disk_cache(cache_dir.path()).unwrap();
    assert_eq!(fresh.get("http://a.com/page"), None);
    assert!(!path.exists());
}

#[test]
fn test_response_record_written_to_disk() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache: ResponseCache = ResponseCache::new(CacheOptions::default());
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    let response = CachedResponse {
        status: 404,
        body: Bytes::from_static(b"gone"),
    };
    cache.put("http://a.com/missing", response.clone());

    let path = cache
        .disk_cache_dir()
        .unwrap()
        .join(filename_for_key("http://a.com/missing"));
    let record = fs::read(&path).unwrap();
    assert_eq!(ResponseCodec::deserialize(&record).unwrap(), response);
}

#[test]
fn test_clear_covers_tmp_named_keys() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    // a key whose mapped file name shares the tempfile prefix
    cache.put("tmpkey", Bytes::from_static(b"v"));
    cache.put("other", Bytes::from_static(b"w"));
    assert!(entry_path(&cache, "tmpkey").exists());

    cache.clear(true);

    assert!(!entry_path(&cache, "tmpkey").exists());
    assert!(!entry_path(&cache, "other").exists());
    assert_eq!(cache.get("tmpkey"), None);
}

#[test]
fn test_prefix_eviction_covers_tmp_named_keys() {
    test_support::setup();
    let cache_dir = test_support::tempdir();

    let cache = cache(None);
    cache.enable_disk_cache(cache_dir.path()).unwrap();
    cache.put("tmp/a", Bytes::from_static(b"a"));
    cache.put("tmp/b", Bytes::from_static(b"b"));

    assert_eq!(cache.remove_all_with_prefix("tmp/"), 2);
    assert!(!entry_path(&cache, "tmp/a").exists());
    assert!(!entry_path(&cache, "tmp/b").exists());
}

#[test]
fn test_capacity_is_a_hint_not_a_bound() {
    test_support::setup();
    let cache = ObjectCache::new(CacheOptions {
        initial_capacity: 2,
        ..Default::default()
    });

    cache.put("k1", Bytes::from_static(b"1"));
    cache.put("k2", Bytes::from_static(b"2"));
    cache.put("k3", Bytes::from_static(b"3"));

    // inserting past the capacity hint evicts nothing
    assert_eq!(cache.get("k2"), Some(Bytes::from_static(b"2")));
    assert_eq!(cache.get("k3"), Some(Bytes::from_static(b"3")));
    assert_eq!(cache.get("k1"), Some(Bytes::from_static(b"1")));
}
