//! Read-through content cache around any backend.
//!
//! Wrapping an expensive backend (a remote one, typically) guarantees at
//! most one full fetch per observed modification: a cached entry is
//! served while the backend's last-write time still matches the one the
//! bytes were fetched under.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::FsResult;
use crate::fs::{FileSystem, FileWatcher, WatchStream};
use crate::stream::{FileStream, MemoryFile};
use crate::types::{EntryKind, OpenOptions, PathRules, SearchOption, WatcherOptions};

/// Bytes and the timestamp they were fetched under, replaced as one.
#[derive(Debug, Clone)]
struct Cached {
    bytes: Bytes,
    last_write: SystemTime,
}

/// Caches whole-file contents of exclusive reads.
///
/// Every other operation is delegated. Opens that can change a file drop
/// its entry first; existence checks, deletes and moves drop entries for
/// paths the backend reports absent.
#[derive(Debug)]
pub struct CachingFileSystem {
    inner: Arc<dyn FileSystem>,
    entries: Mutex<HashMap<PathBuf, Cached>>,
}

impl CachingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }

    /// Drop the cached content of `path`, if any.
    pub fn invalidate(&self, path: &Path) {
        let key = self.key(path);
        if self.entries.lock().remove(&key).is_some() {
            tracing::trace!(path = %key.display(), "cache entry dropped");
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached files.
    pub fn cached_len(&self) -> usize {
        self.entries.lock().len()
    }

    fn key(&self, path: &Path) -> PathBuf {
        let rules = self.inner.path_rules();
        if is_rooted(&rules, path) {
            rules.normalize(path)
        } else {
            let cwd = self.inner.current_directory();
            rules.normalize(&rules.join(&cwd, &path.to_string_lossy()))
        }
    }

    async fn cached_read(&self, path: &Path) -> FsResult<Bytes> {
        let key = self.key(path);

        let stamp = match self.inner.last_write_time(path).await {
            Ok(stamp) => stamp,
            Err(e) => {
                if e.is_not_found() {
                    self.entries.lock().remove(&key);
                }
                return Err(e);
            }
        };

        let hit = self
            .entries
            .lock()
            .get(&key)
            .filter(|cached| cached.last_write == stamp)
            .map(|cached| cached.bytes.clone());
        if let Some(bytes) = hit {
            tracing::trace!(path = %key.display(), "cache hit");
            return Ok(bytes);
        }

        match self.inner.read_all(path).await {
            Ok(bytes) => {
                tracing::debug!(path = %key.display(), len = bytes.len(), "cache fill");
                self.entries.lock().insert(
                    key,
                    Cached {
                        bytes: bytes.clone(),
                        last_write: stamp,
                    },
                );
                Ok(bytes)
            }
            Err(e) => {
                self.entries.lock().remove(&key);
                Err(e)
            }
        }
    }
}

fn is_rooted(rules: &PathRules, path: &Path) -> bool {
    let raw = path.to_string_lossy();
    raw.starts_with(|c| rules.is_separator(c))
        || (rules.volume_separator != rules.separator && raw.contains(rules.volume_separator))
}

#[async_trait]
impl FileSystem for CachingFileSystem {
    fn path_rules(&self) -> PathRules {
        self.inner.path_rules()
    }

    fn current_directory(&self) -> PathBuf {
        self.inner.current_directory()
    }

    fn set_current_directory(&self, path: &Path) -> FsResult<()> {
        self.inner.set_current_directory(path)
    }

    async fn file_exists(&self, path: &Path) -> FsResult<bool> {
        let exists = self.inner.file_exists(path).await?;
        if !exists {
            self.invalidate(path);
        }
        Ok(exists)
    }

    async fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        self.inner.directory_exists(path).await
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        if options.is_exclusive_read() {
            let bytes = self.cached_read(path).await?;
            return Ok(Box::new(MemoryFile::new(bytes)));
        }
        if options.is_mutating() {
            self.invalidate(path);
        }
        self.inner.open(path, options).await
    }

    async fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        self.inner.enumerate(path, pattern, search, kind).await
    }

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.inner.last_write_time(path).await
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.inner.creation_time(path).await
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.inner.last_access_time(path).await
    }

    async fn set_last_write_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.inner.set_last_write_time(path, time).await
    }

    async fn set_last_access_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.inner.set_last_access_time(path, time).await
    }

    async fn create_directory(&self, path: &Path) -> FsResult<()> {
        self.inner.create_directory(path).await
    }

    async fn delete_file(&self, path: &Path) -> FsResult<()> {
        let result = self.inner.delete_file(path).await;
        match &result {
            Ok(()) => self.invalidate(path),
            Err(e) if e.is_not_found() => self.invalidate(path),
            Err(_) => {}
        }
        result
    }

    async fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()> {
        self.inner.delete_directory(path, recursive).await?;
        let rules = self.inner.path_rules();
        let root = self.key(path);
        self.entries.lock().retain(|key, _| !rules.is_within(&root, key));
        Ok(())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let result = self.inner.move_file(from, to).await;
        if result.is_ok() {
            self.invalidate(from);
            self.invalidate(to);
        }
        result
    }

    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        self.inner.create_watcher(options).await
    }

    async fn watch_file(&self, path: &Path) -> FsResult<WatchStream> {
        self.inner.watch_file(path).await
    }
}
