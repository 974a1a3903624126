use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::key::{filename_for_key, filename_prefix};

/// Marker file telling media indexers to skip the cache directory.
const NOMEDIA: &str = ".nomedia";

/// The disk tier of a two-level cache.
///
/// Entries live as flat files under `<root>/cachefu/<underscored-name>/`,
/// named by [`filename_for_key`]. An entry's age is its file's mtime;
/// expired files are deleted lazily on read and eagerly by [`sanitize`].
///
/// All mutations go through one internal lock, so at most one disk mutation
/// per store is in flight at a time. Writes are a tempfile followed by an
/// atomic rename, so readers never observe partial files.
///
/// [`sanitize`]: DiskStore::sanitize
pub struct DiskStore {
    dir: PathBuf,
    ttl: Option<Duration>,
    io_lock: Mutex<()>,
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DiskStore {
    /// Opens (creating if necessary) the store for cache `name` under `root`.
    ///
    /// Also drops the `.nomedia` sentinel into the cache directory.
    pub fn open(root: &Path, name: &str, ttl: Option<Duration>) -> io::Result<Self> {
        let dir = root.join("cachefu").join(underscored(name));
        fs::create_dir_all(&dir)?;

        let sentinel = dir.join(NOMEDIA);
        if !sentinel.exists() {
            fs::File::create(&sentinel)?;
        }

        Ok(DiskStore {
            dir,
            ttl,
            io_lock: Mutex::new(()),
        })
    }

    /// The directory holding this store's entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(filename_for_key(key))
    }

    /// Reads the entry for `key`, deleting and missing it if expired.
    ///
    /// Any I/O problem is reported as a miss; a cache must never fail a
    /// caller because of a bad disk.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match self.read_checked(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "treating unreadable cache file as a miss",
                );
                None
            }
        }
    }

    fn read_checked(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        catch_not_found(|| {
            if self.is_expired(path)? {
                let _io = self.io_lock.lock().unwrap();
                fs::remove_file(path)?;
                return Err(io::ErrorKind::NotFound.into());
            }
            fs::read(path)
        })
    }

    /// Whether a non-expired entry for `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        let path = self.entry_path(key);
        matches!(catch_not_found(|| self.is_expired(&path)), Ok(Some(false)))
    }

    /// Writes `bytes` as the entry for `key`.
    pub fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.entry_path(key);
        let _io = self.io_lock.lock().unwrap();

        let mut temp_file = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&self.dir)?;
        temp_file.write_all(bytes)?;
        temp_file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Removes the entry for `key`, if present.
    pub fn remove(&self, key: &str) -> io::Result<()> {
        let path = self.entry_path(key);
        let _io = self.io_lock.lock().unwrap();
        catch_not_found(|| fs::remove_file(path))?;
        Ok(())
    }

    /// Removes every entry whose file name starts with the mapped form of
    /// `key_prefix`. Returns the number of removed entries.
    pub fn remove_prefix(&self, key_prefix: &str) -> io::Result<usize> {
        let prefix = filename_prefix(key_prefix);
        self.remove_matching(|name, _| name.starts_with(&prefix))
    }

    /// Deletes every entry in the store, keeping the `.nomedia` sentinel.
    pub fn clear(&self) -> io::Result<()> {
        self.remove_matching(|_, _| true)?;
        Ok(())
    }

    /// Eagerly deletes all expired entries.
    ///
    /// Reads delete expired files lazily anyway; this sweep exists so that
    /// enabling disk caching does not leave stale files around until each of
    /// them happens to be requested again.
    pub fn sanitize(&self) -> io::Result<usize> {
        self.remove_matching(|_, path| self.is_expired(path).unwrap_or(false))
    }

    fn remove_matching<F>(&self, matches: F) -> io::Result<usize>
    where
        F: Fn(&str, &Path) -> bool,
    {
        let _io = self.io_lock.lock().unwrap();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // The sentinel and in-flight tempfiles are dot-prefixed and are
            // not entries. Entry names never start with a dot since the key
            // mapping folds `.` away.
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if matches(name, &path) {
                match catch_not_found(|| fs::remove_file(&path)) {
                    Ok(Some(())) => removed += 1,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            error = &e as &dyn std::error::Error,
                            path = %path.display(),
                            "failed to remove cache file",
                        );
                    }
                }
            }
        }
        Ok(removed)
    }

    fn is_expired(&self, path: &Path) -> io::Result<bool> {
        let Some(ttl) = self.ttl else {
            // still probes for existence so `contains` stays truthful
            path.metadata()?;
            return Ok(false);
        };
        let mtime = path.metadata()?.modified()?;
        Ok(mtime.elapsed().unwrap_or_default() > ttl)
    }
}

/// Turns a cache name into a directory-friendly form.
fn underscored(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(' ', "_")
}

pub(super) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
