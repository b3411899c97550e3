//! Core file system types.
//!
//! These types are shared by every backend and travel over the wire, so
//! they stay plain data: no handles, no backend references.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Which entries an enumeration returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Files,
    Directories,
    All,
}

impl EntryKind {
    /// Whether an entry of type `kind` belongs in the result.
    pub fn accepts(&self, kind: FileType) -> bool {
        match self {
            EntryKind::Files => kind.is_file(),
            EntryKind::Directories => kind.is_dir(),
            EntryKind::All => true,
        }
    }
}

/// Whether an enumeration descends into subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchOption {
    #[default]
    TopDirectoryOnly,
    AllDirectories,
}

impl SearchOption {
    pub fn is_recursive(&self) -> bool {
        matches!(self, SearchOption::AllDirectories)
    }
}

// ============================================================================
// Open semantics
// ============================================================================

/// How an open call treats an existing or missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Create; fail if the file exists.
    CreateNew,
    /// Create, truncating an existing file.
    Create,
    /// Open an existing file; fail if missing.
    Open,
    /// Open if present, otherwise create.
    OpenOrCreate,
    /// Open an existing file and truncate it.
    Truncate,
    /// Open or create, positioned at the end.
    Append,
}

/// Requested access to an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn can_read(&self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

bitflags! {
    /// What other openers may do while this handle is live.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FileShare: u8 {
        const NONE = 0;
        const READ = 1;
        const WRITE = 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const DELETE = 4;
    }
}

/// Open options: mode, access and sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    pub mode: OpenMode,
    pub access: FileAccess,
    pub share: FileShare,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::read()
    }
}

impl OpenOptions {
    /// Open an existing file for reading, allowing other readers.
    pub fn read() -> Self {
        Self {
            mode: OpenMode::Open,
            access: FileAccess::Read,
            share: FileShare::READ,
        }
    }

    /// Open an existing file for reading with no sharing at all.
    pub fn read_exclusive() -> Self {
        Self {
            mode: OpenMode::Open,
            access: FileAccess::Read,
            share: FileShare::NONE,
        }
    }

    /// Create or truncate a file for writing.
    pub fn create() -> Self {
        Self {
            mode: OpenMode::Create,
            access: FileAccess::Write,
            share: FileShare::NONE,
        }
    }

    /// Open or create a file, appending to it.
    pub fn append() -> Self {
        Self {
            mode: OpenMode::Append,
            access: FileAccess::Write,
            share: FileShare::READ,
        }
    }

    pub fn with_share(mut self, share: FileShare) -> Self {
        self.share = share;
        self
    }

    /// A read of an existing file that tolerates no concurrent writers.
    ///
    /// Only these opens are served from a content cache: with writers
    /// shut out, the bytes match the timestamp they were fetched under.
    pub fn is_exclusive_read(&self) -> bool {
        self.mode == OpenMode::Open
            && self.access == FileAccess::Read
            && !self.share.contains(FileShare::WRITE)
    }

    /// Whether the open can change the file.
    pub fn is_mutating(&self) -> bool {
        self.access.can_write() || !matches!(self.mode, OpenMode::Open)
    }
}

// ============================================================================
// Path syntax
// ============================================================================

/// How two paths are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathComparison {
    Ordinal,
    OrdinalIgnoreCase,
}

/// Path syntax of a backend: separators and comparison rules.
///
/// Remote backends report theirs once at connect time; all further path
/// arithmetic happens locally against these rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRules {
    pub separator: char,
    pub alt_separator: char,
    pub volume_separator: char,
    pub comparison: PathComparison,
}

impl PathRules {
    pub const UNIX: Self = Self {
        separator: '/',
        alt_separator: '/',
        volume_separator: '/',
        comparison: PathComparison::Ordinal,
    };

    pub const WINDOWS: Self = Self {
        separator: '\\',
        alt_separator: '/',
        volume_separator: ':',
        comparison: PathComparison::OrdinalIgnoreCase,
    };

    /// Rules of the machine this process runs on.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::WINDOWS
        } else {
            Self::UNIX
        }
    }

    pub fn is_separator(&self, c: char) -> bool {
        c == self.separator || c == self.alt_separator
    }

    pub fn ignore_case(&self) -> bool {
        self.comparison == PathComparison::OrdinalIgnoreCase
    }

    /// Canonical form of `path`: one separator style, no `.`/`..` segments,
    /// no trailing separator, case-folded when comparison ignores case.
    ///
    /// Used as the key for caches and tracked-path sets.
    pub fn normalize(&self, path: &Path) -> PathBuf {
        let raw = path.to_string_lossy();
        let rooted = raw.starts_with(|c| self.is_separator(c));

        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split(|c| self.is_separator(c)) {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.last().is_some_and(|s| *s != "..") {
                        segments.pop();
                    } else if !rooted {
                        segments.push("..");
                    }
                }
                s => segments.push(s),
            }
        }

        let sep = self.separator.to_string();
        let mut out = segments.join(&sep);
        if rooted {
            out.insert(0, self.separator);
        }
        if self.ignore_case() {
            out = out.to_lowercase();
        }
        PathBuf::from(out)
    }

    /// Whether two paths name the same entry under these rules.
    pub fn eq(&self, a: &Path, b: &Path) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    /// Final segment of `path`, or the whole path if it has no separator.
    pub fn file_name<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = path.trim_end_matches(|c| self.is_separator(c));
        match trimmed.rfind(|c| self.is_separator(c)) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// Everything before the final segment, or `None` for a bare name.
    pub fn parent<'a>(&self, path: &'a str) -> Option<&'a str> {
        let trimmed = path.trim_end_matches(|c| self.is_separator(c));
        match trimmed.rfind(|c| self.is_separator(c)) {
            Some(0) => Some(&trimmed[..1]),
            Some(idx) => Some(&trimmed[..idx]),
            None => None,
        }
    }

    /// Join `name` onto `base` with this backend's separator.
    pub fn join(&self, base: &Path, name: &str) -> PathBuf {
        let base = base.to_string_lossy();
        if base.is_empty() {
            return PathBuf::from(name);
        }
        if base.ends_with(|c| self.is_separator(c)) {
            PathBuf::from(format!("{base}{name}"))
        } else {
            PathBuf::from(format!("{base}{}{name}", self.separator))
        }
    }

    /// Whether `path` is `root` or lies somewhere beneath it.
    pub fn is_within(&self, root: &Path, path: &Path) -> bool {
        let root = self.normalize(root);
        let path = self.normalize(path);
        let (root, path) = (root.to_string_lossy(), path.to_string_lossy());
        if root == path {
            return true;
        }
        match path.strip_prefix(root.as_ref()) {
            Some(rest) => {
                root.ends_with(|c| self.is_separator(c))
                    || rest.starts_with(|c| self.is_separator(c))
            }
            None => false,
        }
    }

    /// Compare two file names under these rules.
    pub fn name_eq(&self, a: &str, b: &str) -> bool {
        if self.ignore_case() {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }
}

impl Default for PathRules {
    fn default() -> Self {
        Self::host()
    }
}

// ============================================================================
// Change notification
// ============================================================================

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Deleted,
    Changed,
    Renamed,
}

/// A single file change. Renames carry both paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
}

impl ChangeEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::plain(ChangeKind::Created, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::plain(ChangeKind::Deleted, path)
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::plain(ChangeKind::Changed, path)
    }

    pub fn renamed(old_path: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }

    /// A non-rename event of the given kind.
    pub fn plain(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn is_rename(&self) -> bool {
        self.kind == ChangeKind::Renamed
    }
}

/// What a watcher delivers: a change, or a failure of the watch itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Change(ChangeEvent),
    Error(String),
}

impl From<ChangeEvent> for WatchEvent {
    fn from(event: ChangeEvent) -> Self {
        WatchEvent::Change(event)
    }
}

bitflags! {
    /// Which attribute changes a watcher reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NotifyFilters: u32 {
        const FILE_NAME = 1;
        const DIRECTORY_NAME = 2;
        const ATTRIBUTES = 4;
        const SIZE = 8;
        const LAST_WRITE = 16;
        const LAST_ACCESS = 32;
        const CREATION_TIME = 64;
        const SECURITY = 256;
    }
}

impl NotifyFilters {
    /// Filters under which content modifications are reported.
    pub fn reports_content(&self) -> bool {
        self.intersects(Self::LAST_WRITE | Self::SIZE | Self::ATTRIBUTES | Self::CREATION_TIME)
    }

    /// Filters under which creations, deletions and renames are reported.
    pub fn reports_names(&self) -> bool {
        self.intersects(Self::FILE_NAME | Self::DIRECTORY_NAME)
    }
}

impl Default for NotifyFilters {
    fn default() -> Self {
        Self::FILE_NAME | Self::DIRECTORY_NAME | Self::LAST_WRITE
    }
}

/// Properties of a directory watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherOptions {
    /// Directory being watched.
    pub path: PathBuf,
    /// Whether subdirectories are included.
    pub recursive: bool,
    /// Glob applied to file names (`*` matches everything).
    pub filter: String,
    /// Which changes are reported.
    pub notify_filter: NotifyFilters,
    /// Whether events are raised at all.
    pub enabled: bool,
}

impl WatcherOptions {
    /// Watch `path` non-recursively, all names, default filters, enabled.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
            filter: "*".to_string(),
            notify_filter: NotifyFilters::default(),
            enabled: true,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_notify_filter(mut self, notify_filter: NotifyFilters) -> Self {
        self.notify_filter = notify_filter;
        self
    }
}
