//! Local file system backend.
//!
//! A thin pass-through to `tokio::fs`. Relative paths resolve against a
//! per-instance current directory; single-file watches share native
//! watches through a [`WatchRegistry`].

use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tokio::sync::mpsc;

use crate::error::{FsError, FsResult};
use crate::fs::{FileSystem, FileWatcher, SearchPattern, WatchStream};
use crate::multiplex::WatchRegistry;
use crate::native::{NativeWatch, NotifyWatch};
use crate::stream::FileStream;
use crate::types::{
    EntryKind, FileType, OpenMode, OpenOptions, PathRules, SearchOption, WatcherOptions,
};
use crate::watcher::{EventSource, FilteredWatcher};

/// Local file system backend.
#[derive(Debug)]
pub struct LocalFileSystem {
    current_dir: RwLock<PathBuf>,
    registry: Arc<WatchRegistry>,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSystem {
    /// Start in the process working directory with a private watch registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(WatchRegistry::default()))
    }

    /// Share native watches with other instances using the same registry.
    pub fn with_registry(registry: Arc<WatchRegistry>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            current_dir: RwLock::new(cwd),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.read().join(path)
        }
    }

    async fn kind_of(path: &Path) -> FsResult<Option<FileType>> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FileType::Directory)),
            Ok(_) => Ok(Some(FileType::File)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => Ok(None),
            Err(e) => Err(FsError::from_io(e, path.display())),
        }
    }

    async fn set_times(&self, path: &Path, times: FileTimes) -> FsResult<()> {
        let full = self.resolve(path);
        let mut options = fs::OpenOptions::new();
        options.read(true);
        if cfg!(windows) {
            options.write(true);
        }
        let file = options
            .open(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))?;
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_times(times))
            .await
            .map_err(|e| FsError::other(format!("set times task failed: {e}")))?
            .map_err(|e| FsError::from_io(e, full.display()))
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn path_rules(&self) -> PathRules {
        PathRules::host()
    }

    fn current_directory(&self) -> PathBuf {
        self.current_dir.read().clone()
    }

    fn set_current_directory(&self, path: &Path) -> FsResult<()> {
        let full = self.resolve(path);
        let meta = std::fs::metadata(&full).map_err(|e| FsError::from_io(e, full.display()))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(full.display().to_string()));
        }
        *self.current_dir.write() = full;
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> FsResult<bool> {
        Ok(Self::kind_of(&self.resolve(path)).await? == Some(FileType::File))
    }

    async fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        Ok(Self::kind_of(&self.resolve(path)).await? == Some(FileType::Directory))
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        let full = self.resolve(path);
        // Sharing is advisory on Unix; only mode and access map to the OS.
        let mut os = fs::OpenOptions::new();
        os.read(options.access.can_read())
            .write(options.access.can_write());
        match options.mode {
            OpenMode::CreateNew => {
                os.create_new(true);
            }
            OpenMode::Create => {
                os.create(true).truncate(true);
            }
            OpenMode::Open => {}
            OpenMode::OpenOrCreate => {
                os.create(true);
            }
            OpenMode::Truncate => {
                os.truncate(true);
            }
            OpenMode::Append => {
                os.append(true).create(true);
            }
        }
        let file = os
            .open(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))?;
        tracing::trace!(path = %full.display(), ?options, "opened local file");
        Ok(Box::new(file))
    }

    async fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        let root = self.resolve(path);
        let matcher = SearchPattern::new(pattern, self.path_rules())?;
        let mut found = Vec::new();
        let mut pending = vec![root];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| FsError::from_io(e, dir.display()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| FsError::from_io(e, dir.display()))?
            {
                let entry_path = entry.path();
                let Some(file_type) = Self::kind_of(&entry_path).await? else {
                    // Dangling symlink or removed mid-walk.
                    continue;
                };
                if file_type.is_dir() && search.is_recursive() {
                    pending.push(entry_path.clone());
                }
                let name = entry.file_name();
                if kind.accepts(file_type) && matcher.matches(&name.to_string_lossy()) {
                    found.push(entry_path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))?;
        meta.modified().map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))?;
        meta.created().map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))?;
        meta.accessed().map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn set_last_write_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.set_times(path, FileTimes::new().set_modified(time)).await
    }

    async fn set_last_access_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.set_times(path, FileTimes::new().set_accessed(time)).await
    }

    async fn create_directory(&self, path: &Path) -> FsResult<()> {
        let full = self.resolve(path);
        fs::create_dir_all(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn delete_file(&self, path: &Path) -> FsResult<()> {
        let full = self.resolve(path);
        fs::remove_file(&full)
            .await
            .map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()> {
        let full = self.resolve(path);
        let result = if recursive {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_dir(&full).await
        };
        result.map_err(|e| FsError::from_io(e, full.display()))
    }

    async fn move_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let (from, to) = (self.resolve(from), self.resolve(to));
        // rename(2) silently replaces; a move must not.
        if Self::kind_of(&to).await?.is_some() {
            return Err(FsError::already_exists(to.display().to_string()));
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| FsError::from_io(e, from.display()))
    }

    async fn create_watcher(&self, mut options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        options.path = self.resolve(&options.path);
        let (sink, raw) = mpsc::unbounded_channel();
        let mut native = NotifyWatch::new(sink)?;
        native.watch(&options.path, options.recursive)?;
        let watcher = FilteredWatcher::spawn(
            options,
            self.path_rules(),
            EventSource::Native(raw),
            Some(Box::new(native)),
        )?;
        Ok(Box::new(watcher))
    }

    async fn watch_file(&self, path: &Path) -> FsResult<WatchStream> {
        self.registry.subscribe(&self.resolve(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn setup() -> (LocalFileSystem, TempDir) {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        fs.set_current_directory(dir.path()).unwrap();
        (fs, dir)
    }

    #[tokio::test]
    async fn test_write_and_read_relative() {
        let (fs, dir) = setup();
        fs.write_all(Path::new("test.txt"), b"hello world").await.unwrap();

        assert!(fs.file_exists(&dir.path().join("test.txt")).await.unwrap());
        let data = fs.read_all(Path::new("test.txt")).await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_open_modes_map_to_os() {
        let (fs, _dir) = setup();
        let err = fs.open(Path::new("missing.txt"), OpenOptions::read()).await.err().unwrap();
        assert!(err.is_not_found());

        fs.write_all(Path::new("a.txt"), b"one").await.unwrap();
        let mut appender = fs.open(Path::new("a.txt"), OpenOptions::append()).await.unwrap();
        appender.write_all(b" two").await.unwrap();
        appender.shutdown().await.unwrap();
        drop(appender);
        assert_eq!(&fs.read_all(Path::new("a.txt")).await.unwrap()[..], b"one two");
    }

    #[tokio::test]
    async fn test_exists_distinguishes_kinds() {
        let (fs, _dir) = setup();
        fs.create_directory(Path::new("sub/deeper")).await.unwrap();
        assert!(fs.directory_exists(Path::new("sub/deeper")).await.unwrap());
        assert!(!fs.file_exists(Path::new("sub/deeper")).await.unwrap());
        assert!(!fs.file_exists(Path::new("nope/x.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_enumerate_flat_and_recursive() {
        let (fs, dir) = setup();
        fs.create_directory(Path::new("views")).await.unwrap();
        fs.write_all(Path::new("App.axaml"), b"").await.unwrap();
        fs.write_all(Path::new("App.cs"), b"").await.unwrap();
        fs.write_all(Path::new("views/Main.axaml"), b"").await.unwrap();

        let flat = fs
            .enumerate(dir.path(), "*.axaml", SearchOption::TopDirectoryOnly, EntryKind::Files)
            .await
            .unwrap();
        assert_eq!(flat, vec![dir.path().join("App.axaml")]);

        let deep = fs
            .enumerate(dir.path(), "*.axaml", SearchOption::AllDirectories, EntryKind::Files)
            .await
            .unwrap();
        assert_eq!(deep.len(), 2);

        let dirs = fs
            .enumerate(dir.path(), "*", SearchOption::TopDirectoryOnly, EntryKind::Directories)
            .await
            .unwrap();
        assert_eq!(dirs, vec![dir.path().join("views")]);
    }

    #[tokio::test]
    async fn test_move_refuses_to_overwrite() {
        let (fs, _dir) = setup();
        fs.write_all(Path::new("a.txt"), b"a").await.unwrap();
        fs.write_all(Path::new("b.txt"), b"b").await.unwrap();
        let err = fs.move_file(Path::new("a.txt"), Path::new("b.txt")).await.unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));

        fs.move_file(Path::new("a.txt"), Path::new("c.txt")).await.unwrap();
        assert!(!fs.file_exists(Path::new("a.txt")).await.unwrap());
        assert_eq!(&fs.read_all(Path::new("c.txt")).await.unwrap()[..], b"a");
    }

    #[tokio::test]
    async fn test_set_last_write_time() {
        let (fs, _dir) = setup();
        fs.write_all(Path::new("a.txt"), b"a").await.unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs.set_last_write_time(Path::new("a.txt"), stamp).await.unwrap();
        assert_eq!(fs.last_write_time(Path::new("a.txt")).await.unwrap(), stamp);
    }

    #[tokio::test]
    async fn test_delete_directory_requires_recursive_when_not_empty() {
        let (fs, _dir) = setup();
        fs.create_directory(Path::new("d")).await.unwrap();
        fs.write_all(Path::new("d/x.txt"), b"x").await.unwrap();
        assert!(fs.delete_directory(Path::new("d"), false).await.is_err());
        fs.delete_directory(Path::new("d"), true).await.unwrap();
        assert!(!fs.directory_exists(Path::new("d")).await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_file_reports_writes() {
        let (fs, dir) = setup();
        let target = dir.path().join("watched.txt");
        fs.write_all(&target, b"1").await.unwrap();
        let mut stream = fs.watch_file(&target).await.unwrap();

        fs.write_all(&target, b"2").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            crate::types::WatchEvent::Change(change) => {
                assert_eq!(change.path.file_name(), target.file_name())
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
