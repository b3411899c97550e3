//! Synchronous forms of the file system operations.
//!
//! For callers outside any async context: every method blocks the calling
//! thread on the given runtime. Calling these from a runtime worker panics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::types::{EntryKind, SearchOption};

/// Blocking facade over any backend.
#[derive(Debug, Clone)]
pub struct BlockingFileSystem {
    inner: Arc<dyn FileSystem>,
    handle: Handle,
}

impl BlockingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>, handle: Handle) -> Self {
        Self { inner, handle }
    }

    /// Use the runtime the caller is currently inside of.
    pub fn current(inner: Arc<dyn FileSystem>) -> FsResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| FsError::other(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(inner, handle))
    }

    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }

    pub fn file_exists(&self, path: &Path) -> FsResult<bool> {
        self.handle.block_on(self.inner.file_exists(path))
    }

    pub fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        self.handle.block_on(self.inner.directory_exists(path))
    }

    pub fn read_all(&self, path: &Path) -> FsResult<Bytes> {
        self.handle.block_on(self.inner.read_all(path))
    }

    pub fn write_all(&self, path: &Path, data: &[u8]) -> FsResult<()> {
        self.handle.block_on(self.inner.write_all(path, data))
    }

    pub fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        self.handle
            .block_on(self.inner.enumerate(path, pattern, search, kind))
    }

    pub fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.handle.block_on(self.inner.last_write_time(path))
    }

    pub fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.handle.block_on(self.inner.creation_time(path))
    }

    pub fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.handle.block_on(self.inner.last_access_time(path))
    }

    pub fn set_last_write_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.handle.block_on(self.inner.set_last_write_time(path, time))
    }

    pub fn set_last_access_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.handle.block_on(self.inner.set_last_access_time(path, time))
    }

    pub fn create_directory(&self, path: &Path) -> FsResult<()> {
        self.handle.block_on(self.inner.create_directory(path))
    }

    pub fn delete_file(&self, path: &Path) -> FsResult<()> {
        self.handle.block_on(self.inner.delete_file(path))
    }

    pub fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()> {
        self.handle
            .block_on(self.inner.delete_directory(path, recursive))
    }

    pub fn move_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.handle.block_on(self.inner.move_file(from, to))
    }
}
