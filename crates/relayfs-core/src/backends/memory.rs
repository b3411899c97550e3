//! In-memory file system backend.
//!
//! Used for tests and as a scratch backend for servers. All data is
//! ephemeral. Every mutation is published to the backend's watchers.

use std::collections::HashMap;
use std::io::{self, Cursor, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};
use tokio::sync::broadcast;

use crate::error::{FsError, FsResult};
use crate::fs::{FileSystem, FileWatcher, SearchPattern, WATCH_CHANNEL_CAPACITY};
use crate::stream::{FileStream, MemoryFile};
use crate::types::{
    ChangeEvent, EntryKind, FileType, OpenMode, OpenOptions, PathRules, SearchOption, WatchEvent,
    WatcherOptions,
};
use crate::watcher::{EventSource, FilteredWatcher};

#[derive(Debug, Clone, Copy)]
struct Times {
    created: SystemTime,
    modified: SystemTime,
    accessed: SystemTime,
}

impl Times {
    fn now() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            modified: now,
            accessed: now,
        }
    }
}

/// Entry in the memory file system.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Bytes, times: Times },
    Directory { times: Times },
}

impl Entry {
    fn file(data: Bytes) -> Self {
        Entry::File {
            data,
            times: Times::now(),
        }
    }

    fn directory() -> Self {
        Entry::Directory {
            times: Times::now(),
        }
    }

    fn file_type(&self) -> FileType {
        match self {
            Entry::File { .. } => FileType::File,
            Entry::Directory { .. } => FileType::Directory,
        }
    }

    fn times(&self) -> &Times {
        match self {
            Entry::File { times, .. } | Entry::Directory { times } => times,
        }
    }

    fn times_mut(&mut self) -> &mut Times {
        match self {
            Entry::File { times, .. } | Entry::Directory { times } => times,
        }
    }
}

#[derive(Debug)]
struct Shared {
    /// Keyed by root-relative path; the root itself is the empty path.
    entries: RwLock<HashMap<PathBuf, Entry>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Shared {
    fn publish(&self, event: ChangeEvent) {
        tracing::trace!(kind = ?event.kind, path = %event.path.display(), "memory fs change");
        let _ = self.events.send(WatchEvent::Change(event));
    }

    fn commit(&self, key: &Path, data: Bytes) {
        let created = {
            let mut entries = self.entries.write();
            match entries.get_mut(key) {
                Some(Entry::File { data: current, times }) => {
                    *current = data;
                    times.modified = SystemTime::now();
                    false
                }
                _ => {
                    entries.insert(key.to_path_buf(), Entry::file(data));
                    true
                }
            }
        };
        let path = display(key);
        self.publish(if created {
            ChangeEvent::created(path)
        } else {
            ChangeEvent::changed(path)
        });
    }
}

/// In-memory file system with Unix path rules.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryFileSystem {
    shared: Arc<Shared>,
    current_dir: RwLock<PathBuf>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// Create an empty file system containing only `/`.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathBuf::new(), Entry::directory());
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(entries),
                events,
            }),
            current_dir: RwLock::new(PathBuf::from("/")),
        }
    }

    /// Create or replace a file, creating missing parent directories.
    pub async fn write_file(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> FsResult<()> {
        let key = self.key(path.as_ref());
        if key.as_os_str().is_empty() {
            return Err(FsError::IsADirectory("/".to_string()));
        }
        self.ensure_parents(&key)?;
        if let Some(Entry::Directory { .. }) = self.shared.entries.read().get(&key) {
            return Err(FsError::IsADirectory(display_str(&key)));
        }
        self.shared.commit(&key, data.into());
        Ok(())
    }

    /// Number of entries, the root included.
    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Root-relative key: resolve against the current directory, drop `.`
    /// and `..`.
    fn key(&self, path: &Path) -> PathBuf {
        let absolute = if path.has_root() {
            path.to_path_buf()
        } else {
            self.current_dir.read().join(path)
        };
        let mut result = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn ensure_parents(&self, key: &Path) -> FsResult<()> {
        let mut created = Vec::new();
        {
            let mut entries = self.shared.entries.write();
            let mut current = PathBuf::new();
            for component in key.parent().into_iter().flat_map(|p| p.components()) {
                current.push(component);
                match entries.get(&current) {
                    Some(Entry::Directory { .. }) => {}
                    Some(Entry::File { .. }) => {
                        return Err(FsError::NotADirectory(display_str(&current)));
                    }
                    None => {
                        entries.insert(current.clone(), Entry::directory());
                        created.push(display(&current));
                    }
                }
            }
        }
        for dir in created {
            self.shared.publish(ChangeEvent::created(dir));
        }
        Ok(())
    }

    fn require_parent_dir(&self, key: &Path) -> FsResult<()> {
        let parent = key.parent().unwrap_or(Path::new(""));
        match self.shared.entries.read().get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(FsError::NotADirectory(display_str(parent))),
            None => Err(FsError::not_found(display_str(parent))),
        }
    }

    fn with_entry<T>(&self, path: &Path, f: impl FnOnce(&Entry) -> T) -> FsResult<T> {
        let key = self.key(path);
        self.shared
            .entries
            .read()
            .get(&key)
            .map(f)
            .ok_or_else(|| FsError::not_found(display_str(&key)))
    }

    fn with_entry_mut<T>(&self, path: &Path, f: impl FnOnce(&mut Entry) -> T) -> FsResult<T> {
        let key = self.key(path);
        self.shared
            .entries
            .write()
            .get_mut(&key)
            .map(f)
            .ok_or_else(|| FsError::not_found(display_str(&key)))
    }
}

fn display(key: &Path) -> PathBuf {
    Path::new("/").join(key)
}

fn display_str(key: &Path) -> String {
    display(key).display().to_string()
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn path_rules(&self) -> PathRules {
        PathRules::UNIX
    }

    fn current_directory(&self) -> PathBuf {
        self.current_dir.read().clone()
    }

    fn set_current_directory(&self, path: &Path) -> FsResult<()> {
        let key = self.key(path);
        match self.shared.entries.read().get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(FsError::NotADirectory(display_str(&key))),
            None => return Err(FsError::not_found(display_str(&key))),
        }
        *self.current_dir.write() = display(&key);
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> FsResult<bool> {
        let key = self.key(path);
        Ok(matches!(self.shared.entries.read().get(&key), Some(Entry::File { .. })))
    }

    async fn directory_exists(&self, path: &Path) -> FsResult<bool> {
        let key = self.key(path);
        Ok(matches!(
            self.shared.entries.read().get(&key),
            Some(Entry::Directory { .. })
        ))
    }

    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>> {
        let key = self.key(path);
        let existing = match self.shared.entries.read().get(&key) {
            Some(Entry::Directory { .. }) => return Err(FsError::IsADirectory(display_str(&key))),
            Some(Entry::File { data, .. }) => Some(data.clone()),
            None => None,
        };

        let initial = match (options.mode, existing) {
            (OpenMode::CreateNew, Some(_)) => {
                return Err(FsError::already_exists(display_str(&key)));
            }
            (OpenMode::Open | OpenMode::Truncate, None) => {
                return Err(FsError::not_found(display_str(&key)));
            }
            (OpenMode::Create | OpenMode::Truncate, Some(_)) => {
                self.shared.commit(&key, Bytes::new());
                Bytes::new()
            }
            (_, Some(data)) => data,
            (_, None) => {
                self.require_parent_dir(&key)?;
                self.shared.commit(&key, Bytes::new());
                Bytes::new()
            }
        };

        if let Some(entry) = self.shared.entries.write().get_mut(&key) {
            entry.times_mut().accessed = SystemTime::now();
        }

        if !options.access.can_write() {
            return Ok(Box::new(MemoryFile::new(initial)));
        }

        let mut buf = Cursor::new(initial.to_vec());
        if options.mode == OpenMode::Append {
            buf.set_position(initial.len() as u64);
        }
        Ok(Box::new(MemoryWriter {
            shared: self.shared.clone(),
            key,
            buf,
            dirty: false,
        }))
    }

    async fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>> {
        let dir = self.key(path);
        let matcher = SearchPattern::new(pattern, PathRules::UNIX)?;
        let entries = self.shared.entries.read();
        match entries.get(&dir) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(FsError::NotADirectory(display_str(&dir))),
            None => return Err(FsError::not_found(display_str(&dir))),
        }

        let mut found: Vec<PathBuf> = entries
            .iter()
            .filter(|(key, _)| key.as_path() != dir.as_path())
            .filter(|(key, _)| {
                if search.is_recursive() {
                    key.starts_with(&dir)
                } else {
                    key.parent() == Some(dir.as_path())
                }
            })
            .filter(|(_, entry)| kind.accepts(entry.file_type()))
            .filter(|(key, _)| {
                key.file_name()
                    .is_some_and(|name| matcher.matches(&name.to_string_lossy()))
            })
            .map(|(key, _)| display(key))
            .collect();
        found.sort();
        Ok(found)
    }

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.with_entry(path, |e| e.times().modified)
    }

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.with_entry(path, |e| e.times().created)
    }

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime> {
        self.with_entry(path, |e| e.times().accessed)
    }

    async fn set_last_write_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.with_entry_mut(path, |e| e.times_mut().modified = time)?;
        self.shared.publish(ChangeEvent::changed(display(&self.key(path))));
        Ok(())
    }

    async fn set_last_access_time(&self, path: &Path, time: SystemTime) -> FsResult<()> {
        self.with_entry_mut(path, |e| e.times_mut().accessed = time)
    }

    async fn create_directory(&self, path: &Path) -> FsResult<()> {
        let key = self.key(path);
        self.ensure_parents(&key)?;
        let created = {
            let mut entries = self.shared.entries.write();
            match entries.get(&key) {
                Some(Entry::Directory { .. }) => false,
                Some(Entry::File { .. }) => {
                    return Err(FsError::already_exists(display_str(&key)));
                }
                None => {
                    entries.insert(key.clone(), Entry::directory());
                    true
                }
            }
        };
        if created {
            self.shared.publish(ChangeEvent::created(display(&key)));
        }
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> FsResult<()> {
        let key = self.key(path);
        {
            let mut entries = self.shared.entries.write();
            match entries.get(&key) {
                Some(Entry::File { .. }) => {
                    entries.remove(&key);
                }
                Some(Entry::Directory { .. }) => {
                    return Err(FsError::IsADirectory(display_str(&key)));
                }
                None => return Err(FsError::not_found(display_str(&key))),
            }
        }
        self.shared.publish(ChangeEvent::deleted(display(&key)));
        Ok(())
    }

    async fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()> {
        let key = self.key(path);
        if key.as_os_str().is_empty() {
            return Err(FsError::permission_denied("/"));
        }
        let removed = {
            let mut entries = self.shared.entries.write();
            match entries.get(&key) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => {
                    return Err(FsError::NotADirectory(display_str(&key)));
                }
                None => return Err(FsError::not_found(display_str(&key))),
            }
            let mut children: Vec<PathBuf> = entries
                .keys()
                .filter(|k| k.starts_with(&key) && k.as_path() != key.as_path())
                .cloned()
                .collect();
            if !children.is_empty() && !recursive {
                return Err(FsError::other(format!(
                    "directory not empty: {}",
                    display_str(&key)
                )));
            }
            // Deepest first, so deletions arrive child before parent.
            children.sort_by(|a, b| b.cmp(a));
            for child in &children {
                entries.remove(child);
            }
            entries.remove(&key);
            children.push(key);
            children
        };
        for key in removed {
            self.shared.publish(ChangeEvent::deleted(display(&key)));
        }
        Ok(())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let from_key = self.key(from);
        let to_key = self.key(to);
        self.require_parent_dir(&to_key)?;
        {
            let mut entries = self.shared.entries.write();
            match entries.get(&from_key) {
                Some(Entry::File { .. }) => {}
                Some(Entry::Directory { .. }) => {
                    return Err(FsError::IsADirectory(display_str(&from_key)));
                }
                None => return Err(FsError::not_found(display_str(&from_key))),
            }
            if entries.contains_key(&to_key) {
                return Err(FsError::already_exists(display_str(&to_key)));
            }
            if let Some(entry) = entries.remove(&from_key) {
                entries.insert(to_key.clone(), entry);
            }
        }
        self.shared
            .publish(ChangeEvent::renamed(display(&from_key), display(&to_key)));
        Ok(())
    }

    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>> {
        let watcher = FilteredWatcher::spawn(
            options,
            PathRules::UNIX,
            EventSource::Shared(self.shared.events.subscribe()),
            None,
        )?;
        Ok(Box::new(watcher))
    }
}

/// Writable handle into a memory file.
///
/// Contents are committed on flush, on shutdown and when dropped.
#[derive(Debug)]
struct MemoryWriter {
    shared: Arc<Shared>,
    key: PathBuf,
    buf: Cursor<Vec<u8>>,
    dirty: bool,
}

impl MemoryWriter {
    fn commit(&mut self) {
        if self.dirty {
            self.dirty = false;
            let data = Bytes::copy_from_slice(self.buf.get_ref());
            self.shared.commit(&self.key, data);
        }
    }
}

impl AsyncRead for MemoryWriter {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.buf).poll_read(cx, buf)
    }
}

impl AsyncSeek for MemoryWriter {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.buf).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.buf).poll_complete(cx)
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.dirty = true;
        Pin::new(&mut self.buf).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.commit();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.commit();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.commit();
    }
}
