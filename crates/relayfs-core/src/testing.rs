//! Test doubles: an instrumented file system wrapper and a fake native watch.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{FsError, FsResult};
use crate::fs::{FileSystem, FileWatcher};
use crate::native::{NativeSink, NativeWatch, NativeWatchFactory};
use crate::stream::FileStream;
use crate::types::{EntryKind, OpenOptions, PathRules, SearchOption, WatchEvent, WatcherOptions};

/// Wraps a file system, counting calls and optionally failing opens.
#[derive(Debug)]
pub struct CountingFileSystem {
    inner: Arc<dyn FileSystem>,
    opens: AtomicU32,
    stat_calls: AtomicU32,
    failures_left: AtomicU32,
}

impl CountingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            opens: AtomicU32::new(0),
            stat_calls: AtomicU32::new(0),
            failures_left: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` opens with a transient I/O error.
    pub fn fail_opens(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Opens attempted so far, failed ones included.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Timestamp and existence queries so far.
    pub fn stat_calls(&self) -> u32 {
        self.stat_calls.load(Ordering::SeqCst)
    }

    fn stat(&self) {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileSystem for CountingFileSystem {
    fn path_rules(&self) -> PathRules {
        self.inner.path_rules()
    }

    fn current_directory(&self) -> PathBuf {
        self.inner.current_directory()
    }

    async fn file_exists(&self, path: &Path) -> FsResult<bool> {
        self.stat();
        self.inner.file_exists(path).await
    }

    async fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        self.stat();
        self.inner.directory_exists(path).await
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FsError::Io(io::Error::other("sharing violation")));
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
        self.stat();
        self.inner.last_write_time(path).await
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.stat();
        self.inner.creation_time(path).await
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.stat();
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
        self.inner.delete_file(path).await
    }

    async fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()> {
        self.inner.delete_directory(path, recursive).await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.inner.move_file(from, to).await
    }

    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        self.inner.create_watcher(options).await
    }
}

#[derive(Debug, Default)]
struct FakeState {
    sink: Option<NativeSink>,
    watched: Vec<PathBuf>,
    watch_calls: u32,
    refused: Option<PathBuf>,
}

/// Native watch stand-in that records roots and emits events on demand.
#[derive(Debug, Clone, Default)]
pub struct FakeNativeWatch {
    state: Arc<Mutex<FakeState>>,
}

impl FakeNativeWatch {
    /// A factory whose watches all report into this fake.
    pub fn factory(&self) -> Box<NativeWatchFactory> {
        let state = self.state.clone();
        Box::new(move |sink| {
            state.lock().sink = Some(sink);
            Ok(Box::new(FakeNativeWatch {
                state: state.clone(),
            }) as Box<dyn NativeWatch>)
        })
    }

    /// Deliver an event as if the OS had reported it.
    pub fn emit(&self, event: WatchEvent) {
        if let Some(sink) = &self.state.lock().sink {
            let _ = sink.send(event);
        }
    }

    /// Paths currently watched.
    pub fn watched(&self) -> Vec<PathBuf> {
        self.state.lock().watched.clone()
    }

    pub fn watch_calls(&self) -> u32 {
        self.state.lock().watch_calls
    }

    /// Make every later attempt to watch `path` fail.
    pub fn refuse(&self, path: impl Into<PathBuf>) {
        self.state.lock().refused = Some(path.into());
    }
}

impl NativeWatch for FakeNativeWatch {
    fn watch(&mut self, path: &Path, _recursive: bool) -> FsResult<()> {
        let mut state = self.state.lock();
        state.watch_calls += 1;
        if state.refused.as_deref() == Some(path) {
            return Err(FsError::PermissionDenied(path.display().to_string()));
        }
        state.watched.push(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> FsResult<()> {
        let mut state = self.state.lock();
        let before = state.watched.len();
        state.watched.retain(|p| p != path);
        if state.watched.len() == before {
            return Err(FsError::other(format!("not watched: {}", path.display())));
        }
        Ok(())
    }
}
