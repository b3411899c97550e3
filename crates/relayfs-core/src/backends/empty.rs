//! A backend with nothing in it.
//!
//! Useful where a file system is required but no files should be visible.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::{FsError, FsResult};
use crate::fs::{FileSystem, FileWatcher};
use crate::stream::FileStream;
use crate::types::{EntryKind, OpenOptions, PathRules, SearchOption, WatcherOptions};
use crate::watcher::FilteredWatcher;

/// Every path is absent and every mutation is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFileSystem {
    rules: PathRules,
}

impl EmptyFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: PathRules) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl FileSystem for EmptyFileSystem {
    fn path_rules(&self) -> PathRules {
        self.rules
    }

    fn current_directory(&self) -> PathBuf {
        PathBuf::from(self.rules.separator.to_string())
    }

    async fn file_exists(&self, _path: &Path) -> FsResult<bool> {
        Ok(false)
    }

    async fn directory_exists(&self, _path: &Path) -> FsResult<bool> {
        Ok(false)
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        if options.is_mutating() {
            return Err(FsError::not_supported(format!("open {} for writing", path.display())));
        }
        Err(FsError::not_found(path.display().to_string()))
    }

    async fn enumerate(
        &self,
        _path: &Path,
        _pattern: &str,
        _search: SearchOption,
        _kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        Err(FsError::not_found(path.display().to_string()))
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        Err(FsError::not_found(path.display().to_string()))
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        Err(FsError::not_found(path.display().to_string()))
    }

    async fn set_last_write_time(&self, _path: &Path, _time: SystemTime) -> FsResult<()> {
        Err(FsError::not_supported("set_last_write_time"))
    }

    async fn set_last_access_time(&self, _path: &Path, _time: SystemTime) -> FsResult<()> {
        Err(FsError::not_supported("set_last_access_time"))
    }

    async fn create_directory(&self, _path: &Path) -> FsResult<()> {
        Err(FsError::not_supported("create_directory"))
    }

    async fn delete_file(&self, _path: &Path) -> FsResult<()> {
        Err(FsError::not_supported("delete_file"))
    }

    async fn delete_directory(&self, _path: &Path, _recursive: bool) -> FsResult<()> {
        Err(FsError::not_supported("delete_directory"))
    }

    async fn move_file(&self, _from: &Path, _to: &Path) -> FsResult<()> {
        Err(FsError::not_supported("move_file"))
    }

    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        Ok(Box::new(FilteredWatcher::idle(options, self.rules)?))
    }
}
