//! The file system contract.
//!
//! Every backend (local disk, empty stub, in-memory, remote, and the
//! caching wrapper around any of them) implements [`FileSystem`], so a
//! consumer can swap backends without code changes.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::error::{FsError, FsResult};
use crate::stream::FileStream;
use crate::types::{
    EntryKind, NotifyFilters, OpenOptions, PathRules, SearchOption, WatchEvent, WatcherOptions,
};

/// Capacity of the broadcast channels watchers publish on.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Core file system operations.
///
/// Backends may support only a subset; unsupported operations fail with
/// [`FsError::NotSupported`]. The contract itself is stateless.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    // ========================================================================
    // Path syntax
    // ========================================================================

    /// Separators and comparison rules of this backend.
    fn path_rules(&self) -> PathRules;

    /// Directory relative paths resolve against.
    fn current_directory(&self) -> PathBuf;

    /// Change the current directory. Only local backends allow this.
    fn set_current_directory(&self, path: &Path) -> FsResult<()> {
        Err(FsError::not_supported(format!(
            "set_current_directory({})",
            path.display()
        )))
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Whether a regular file exists at `path`.
    async fn file_exists(&self, path: &Path) -> FsResult<bool>;

    /// Whether a directory exists at `path`.
    async fn directory_exists(&self, path: &Path) -> FsResult<bool>;

    /// Open a file with the given mode, access and sharing.
    async fn open(&self, path: &Path, options: OpenOptions) -> FsResult<Box<dyn FileStream>>;

    /// List entries under `path` whose names match `pattern`.
    ///
    /// Returned paths are full paths built with this backend's separator.
    async fn enumerate(
        &self,
        path: &Path,
        pattern: &str,
        search: SearchOption,
        kind: EntryKind,
    ) -> FsResult<Vec<PathBuf>>;

    async fn last_write_time(&self, path: &Path) -> FsResult<SystemTime>;

    async fn creation_time(&self, path: &Path) -> FsResult<SystemTime>;

    async fn last_access_time(&self, path: &Path) -> FsResult<SystemTime>;

    // ========================================================================
    // Writing
    // ========================================================================

    async fn set_last_write_time(&self, path: &Path, time: SystemTime) -> FsResult<()>;

    async fn set_last_access_time(&self, path: &Path, time: SystemTime) -> FsResult<()>;

    /// Create a directory and any missing parents.
    async fn create_directory(&self, path: &Path) -> FsResult<()>;

    async fn delete_file(&self, path: &Path) -> FsResult<()>;

    async fn delete_directory(&self, path: &Path, recursive: bool) -> FsResult<()>;

    async fn move_file(&self, from: &Path, to: &Path) -> FsResult<()>;

    // ========================================================================
    // Watching
    // ========================================================================

    /// Create a directory watcher.
    async fn create_watcher(&self, options: WatcherOptions) -> FsResult<Box<dyn FileWatcher>>;

    /// Raw change events for a single file.
    ///
    /// The default watches the parent directory, filtered to the file name.
    async fn watch_file(&self, path: &Path) -> FsResult<WatchStream> {
        let rules = self.path_rules();
        let raw = path.to_string_lossy();
        let parent = rules
            .parent(&raw)
            .ok_or_else(|| FsError::invalid_path(raw.to_string()))?;
        let name = rules.file_name(&raw);

        let options = WatcherOptions::new(parent)
            .with_filter(glob::Pattern::escape(name))
            .with_notify_filter(NotifyFilters::FILE_NAME | NotifyFilters::LAST_WRITE | NotifyFilters::SIZE);
        let watcher = self.create_watcher(options).await?;
        let rx = watcher.subscribe();
        Ok(WatchStream::new(rx, watcher))
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> FsResult<Bytes> {
        let mut stream = self.open(path, OpenOptions::read()).await?;
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| FsError::from_io(e, path.display()))?;
        Ok(Bytes::from(buf))
    }

    /// Create or replace a file with `data`.
    async fn write_all(&self, path: &Path, data: &[u8]) -> FsResult<()> {
        let mut stream = self.open(path, OpenOptions::create()).await?;
        stream
            .write_all(data)
            .await
            .map_err(|e| FsError::from_io(e, path.display()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| FsError::from_io(e, path.display()))?;
        Ok(())
    }

    /// Whether anything (file or directory) exists at `path`.
    async fn exists(&self, path: &Path) -> FsResult<bool> {
        Ok(self.file_exists(path).await? || self.directory_exists(path).await?)
    }
}

/// A live directory watcher.
///
/// Property setters take effect on the running watch; on remote backends
/// each setter is one strictly ordered frame on the watcher's connection.
#[async_trait]
pub trait FileWatcher: Send + Sync + fmt::Debug {
    /// Current properties.
    fn options(&self) -> WatcherOptions;

    /// A new receiver of this watcher's events.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;

    async fn set_path(&self, path: PathBuf) -> FsResult<()>;

    async fn set_enabled(&self, enabled: bool) -> FsResult<()>;

    async fn set_recursive(&self, recursive: bool) -> FsResult<()>;

    async fn set_filter(&self, filter: String) -> FsResult<()>;

    async fn set_notify_filter(&self, notify_filter: NotifyFilters) -> FsResult<()>;
}

/// Receiver of raw watch events plus whatever keeps their source alive.
///
/// Dropping the stream releases the source: a multiplexer subscription,
/// a watcher, a remote connection.
pub struct WatchStream {
    rx: broadcast::Receiver<WatchEvent>,
    _guard: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl WatchStream {
    pub fn new(rx: broadcast::Receiver<WatchEvent>, guard: impl Any + Send + Sync) -> Self {
        Self {
            rx,
            _guard: Box::new(guard),
        }
    }

    /// Next event, or `None` once the source is gone.
    ///
    /// A receiver that fell behind skips the lost events and keeps going.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch stream lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch stream lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Name matcher for enumeration patterns and watcher filters.
///
/// `*`, `*.*` and the empty string match every name.
#[derive(Debug, Clone)]
pub struct SearchPattern {
    pattern: Option<glob::Pattern>,
    options: glob::MatchOptions,
}

impl SearchPattern {
    pub fn new(pattern: &str, rules: PathRules) -> FsResult<Self> {
        let options = glob::MatchOptions {
            case_sensitive: !rules.ignore_case(),
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let pattern = match pattern {
            "" | "*" | "*.*" => None,
            p => Some(
                glob::Pattern::new(p)
                    .map_err(|e| FsError::invalid_path(format!("bad pattern {p:?}: {e}")))?,
            ),
        };
        Ok(Self { pattern, options })
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            Some(p) => p.matches_with(name, self.options),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern() {
        let all = SearchPattern::new("*", PathRules::UNIX).unwrap();
        assert!(all.matches("anything.txt"));

        let axaml = SearchPattern::new("*.axaml", PathRules::UNIX).unwrap();
        assert!(axaml.matches("App.axaml"));
        assert!(!axaml.matches("App.AXAML"));
        assert!(!axaml.matches("App.cs"));

        let ci = SearchPattern::new("*.axaml", PathRules::WINDOWS).unwrap();
        assert!(ci.matches("App.AXAML"));
    }

    #[test]
    fn test_search_pattern_escaped_literal() {
        let p = SearchPattern::new(&glob::Pattern::escape("a[1].txt"), PathRules::UNIX).unwrap();
        assert!(p.matches("a[1].txt"));
        assert!(!p.matches("a1.txt"));
    }

    #[test]
    fn test_bad_pattern_is_invalid_path() {
        let err = SearchPattern::new("[", PathRules::UNIX).unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)));
    }
}
