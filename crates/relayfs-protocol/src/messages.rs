//! Payload layouts of individual actions.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use relayfs_core::{
    ChangeEvent, ChangeKind, EntryKind, FileAccess, FileShare, NotifyFilters, OpenMode,
    OpenOptions, PathComparison, PathRules, SearchOption, WatchEvent, WatcherOptions,
};

use crate::action::Action;
use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{PayloadReader, PayloadWriter};

/// Paths travel as UTF-8; anything else cannot be named on the wire.
fn path_str(path: &Path) -> ProtocolResult<&str> {
    path.to_str()
        .ok_or_else(|| ProtocolError::InvalidPath(path.to_path_buf()))
}

fn single_char(what: &'static str, s: &str) -> ProtocolResult<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ProtocolError::invalid(what, s.chars().count() as i64)),
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Path syntax and starting directory of the serving backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub rules: PathRules,
    pub current_directory: PathBuf,
}

impl SessionState {
    /// `[sep: string][altSep: string][volSep: string][comparison: u8][cwd: string]`
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let comparison = match self.rules.comparison {
            PathComparison::Ordinal => 0,
            PathComparison::OrdinalIgnoreCase => 1,
        };
        let mut w = PayloadWriter::new();
        w.put_string(&self.rules.separator.to_string())
            .put_string(&self.rules.alt_separator.to_string())
            .put_string(&self.rules.volume_separator.to_string())
            .put_u8(comparison)
            .put_string(path_str(&self.current_directory)?);
        Ok(w.finish())
    }

    pub fn decode(payload: Bytes) -> ProtocolResult<Self> {
        let mut r = PayloadReader::new(payload);
        let separator = single_char("separator", &r.string()?)?;
        let alt_separator = single_char("alternate separator", &r.string()?)?;
        let volume_separator = single_char("volume separator", &r.string()?)?;
        let comparison = match r.u8()? {
            0 => PathComparison::Ordinal,
            1 => PathComparison::OrdinalIgnoreCase,
            other => return Err(ProtocolError::invalid("path comparison", other)),
        };
        let current_directory = PathBuf::from(r.string()?);
        r.finish()?;
        Ok(Self {
            rules: PathRules {
                separator,
                alt_separator,
                volume_separator,
                comparison,
            },
            current_directory,
        })
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Payload that is just a path: existence checks and timestamp queries.
pub fn encode_path(path: &Path) -> ProtocolResult<Bytes> {
    let mut w = PayloadWriter::new();
    w.put_string(path_str(path)?);
    Ok(w.finish())
}

pub fn decode_path(payload: Bytes) -> ProtocolResult<PathBuf> {
    let mut r = PayloadReader::new(payload);
    let path = r.string()?;
    r.finish()?;
    Ok(PathBuf::from(path))
}

fn mode_code(mode: OpenMode) -> u8 {
    match mode {
        OpenMode::CreateNew => 1,
        OpenMode::Create => 2,
        OpenMode::Open => 3,
        OpenMode::OpenOrCreate => 4,
        OpenMode::Truncate => 5,
        OpenMode::Append => 6,
    }
}

fn mode_from_code(code: u8) -> ProtocolResult<OpenMode> {
    Ok(match code {
        1 => OpenMode::CreateNew,
        2 => OpenMode::Create,
        3 => OpenMode::Open,
        4 => OpenMode::OpenOrCreate,
        5 => OpenMode::Truncate,
        6 => OpenMode::Append,
        other => return Err(ProtocolError::invalid("open mode", other)),
    })
}

fn access_code(access: FileAccess) -> u8 {
    match access {
        FileAccess::Read => 1,
        FileAccess::Write => 2,
        FileAccess::ReadWrite => 3,
    }
}

fn access_from_code(code: u8) -> ProtocolResult<FileAccess> {
    Ok(match code {
        1 => FileAccess::Read,
        2 => FileAccess::Write,
        3 => FileAccess::ReadWrite,
        other => return Err(ProtocolError::invalid("file access", other)),
    })
}

/// `OpenRead` request. The response payload is the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub path: PathBuf,
    pub options: OpenOptions,
}

impl OpenRequest {
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let mut w = PayloadWriter::new();
        w.put_string(path_str(&self.path)?)
            .put_u8(mode_code(self.options.mode))
            .put_u8(access_code(self.options.access))
            .put_u8(self.options.share.bits());
        Ok(w.finish())
    }

    pub fn decode(payload: Bytes) -> ProtocolResult<Self> {
        let mut r = PayloadReader::new(payload);
        let path = PathBuf::from(r.string()?);
        let mode = mode_from_code(r.u8()?)?;
        let access = access_from_code(r.u8()?)?;
        let share = FileShare::from_bits_truncate(r.u8()?);
        r.finish()?;
        Ok(Self {
            path,
            options: OpenOptions {
                mode,
                access,
                share,
            },
        })
    }
}

/// `Enumerate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerateRequest {
    pub path: PathBuf,
    pub pattern: String,
    pub search: SearchOption,
    pub kind: EntryKind,
}

impl EnumerateRequest {
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let kind = match self.kind {
            EntryKind::Files => 1,
            EntryKind::Directories => 2,
            EntryKind::All => 3,
        };
        let mut w = PayloadWriter::new();
        w.put_string(path_str(&self.path)?)
            .put_string(&self.pattern)
            .put_bool(self.search.is_recursive())
            .put_u8(kind);
        Ok(w.finish())
    }

    pub fn decode(payload: Bytes) -> ProtocolResult<Self> {
        let mut r = PayloadReader::new(payload);
        let path = PathBuf::from(r.string()?);
        let pattern = r.string()?;
        let search = if r.bool()? {
            SearchOption::AllDirectories
        } else {
            SearchOption::TopDirectoryOnly
        };
        let kind = match r.u8()? {
            1 => EntryKind::Files,
            2 => EntryKind::Directories,
            3 => EntryKind::All,
            other => return Err(ProtocolError::invalid("entry kind", other)),
        };
        r.finish()?;
        Ok(Self {
            path,
            pattern,
            search,
            kind,
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

/// `[count: i32][path: string]*`
pub fn encode_paths(paths: &[PathBuf]) -> ProtocolResult<Bytes> {
    let mut w = PayloadWriter::new();
    w.put_i32(paths.len() as i32);
    for path in paths {
        w.put_string(path_str(path)?);
    }
    Ok(w.finish())
}

pub fn decode_paths(payload: Bytes) -> ProtocolResult<Vec<PathBuf>> {
    let mut r = PayloadReader::new(payload);
    let count = r.i32()?;
    let count = usize::try_from(count).map_err(|_| ProtocolError::NegativeLength(count))?;
    // Each entry is at least its length prefix.
    if count > r.remaining() / 4 {
        return Err(ProtocolError::Truncated {
            needed: count * 4,
            remaining: r.remaining(),
        });
    }
    let mut paths = Vec::with_capacity(count);
    for _ in 0..count {
        paths.push(PathBuf::from(r.string()?));
    }
    r.finish()?;
    Ok(paths)
}

pub fn encode_bool(value: bool) -> Bytes {
    let mut w = PayloadWriter::new();
    w.put_bool(value);
    w.finish()
}

pub fn decode_bool(payload: Bytes) -> ProtocolResult<bool> {
    let mut r = PayloadReader::new(payload);
    let value = r.bool()?;
    r.finish()?;
    Ok(value)
}

pub fn encode_time(value: SystemTime) -> Bytes {
    let mut w = PayloadWriter::new();
    w.put_time(value);
    w.finish()
}

pub fn decode_time(payload: Bytes) -> ProtocolResult<SystemTime> {
    let mut r = PayloadReader::new(payload);
    let value = r.time()?;
    r.finish()?;
    Ok(value)
}

// ============================================================================
// Watchers
// ============================================================================

/// `CreateWatcher` payload:
/// `[path: string][recursive: u8][filter: string][notifyFilter: u32][enabled: u8]`
pub fn encode_watcher_options(options: &WatcherOptions) -> ProtocolResult<Bytes> {
    let mut w = PayloadWriter::new();
    w.put_string(path_str(&options.path)?)
        .put_bool(options.recursive)
        .put_string(&options.filter)
        .put_u32(options.notify_filter.bits())
        .put_bool(options.enabled);
    Ok(w.finish())
}

pub fn decode_watcher_options(payload: Bytes) -> ProtocolResult<WatcherOptions> {
    let mut r = PayloadReader::new(payload);
    let path = PathBuf::from(r.string()?);
    let recursive = r.bool()?;
    let filter = r.string()?;
    let notify_filter = NotifyFilters::from_bits_truncate(r.u32()?);
    let enabled = r.bool()?;
    r.finish()?;
    Ok(WatcherOptions {
        path,
        recursive,
        filter,
        notify_filter,
        enabled,
    })
}

/// A one-way property update on a live watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherProperty {
    Path(PathBuf),
    Enabled(bool),
    Recursive(bool),
    Filter(String),
    NotifyFilter(NotifyFilters),
}

impl WatcherProperty {
    pub fn action(&self) -> Action {
        match self {
            WatcherProperty::Path(_) => Action::SetWatcherPath,
            WatcherProperty::Enabled(_) => Action::SetWatcherEnabled,
            WatcherProperty::Recursive(_) => Action::SetWatcherRecursive,
            WatcherProperty::Filter(_) => Action::SetWatcherFilter,
            WatcherProperty::NotifyFilter(_) => Action::SetWatcherNotifyFilter,
        }
    }

    /// The payload is the serialized new value.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let mut w = PayloadWriter::new();
        match self {
            WatcherProperty::Path(path) => w.put_string(path_str(path)?),
            WatcherProperty::Enabled(v) | WatcherProperty::Recursive(v) => w.put_bool(*v),
            WatcherProperty::Filter(filter) => w.put_string(filter),
            WatcherProperty::NotifyFilter(nf) => w.put_u32(nf.bits()),
        };
        Ok(w.finish())
    }

    pub fn decode(action: Action, payload: Bytes) -> ProtocolResult<Self> {
        let mut r = PayloadReader::new(payload);
        let property = match action {
            Action::SetWatcherPath => WatcherProperty::Path(PathBuf::from(r.string()?)),
            Action::SetWatcherEnabled => WatcherProperty::Enabled(r.bool()?),
            Action::SetWatcherRecursive => WatcherProperty::Recursive(r.bool()?),
            Action::SetWatcherFilter => WatcherProperty::Filter(r.string()?),
            Action::SetWatcherNotifyFilter => {
                WatcherProperty::NotifyFilter(NotifyFilters::from_bits_truncate(r.u32()?))
            }
            other => return Err(ProtocolError::invalid("watcher property", u8::from(other))),
        };
        r.finish()?;
        Ok(property)
    }

    /// Apply to a local copy of the watcher's options.
    pub fn apply(self, options: &mut WatcherOptions) {
        match self {
            WatcherProperty::Path(path) => options.path = path,
            WatcherProperty::Enabled(v) => options.enabled = v,
            WatcherProperty::Recursive(v) => options.recursive = v,
            WatcherProperty::Filter(filter) => options.filter = filter,
            WatcherProperty::NotifyFilter(nf) => options.notify_filter = nf,
        }
    }
}

fn kind_code(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::Created => 1,
        ChangeKind::Deleted => 2,
        ChangeKind::Changed => 4,
        ChangeKind::Renamed => 8,
    }
}

fn kind_from_code(code: u8) -> ProtocolResult<ChangeKind> {
    Ok(match code {
        1 => ChangeKind::Created,
        2 => ChangeKind::Deleted,
        4 => ChangeKind::Changed,
        8 => ChangeKind::Renamed,
        other => return Err(ProtocolError::invalid("change kind", other)),
    })
}

fn push_action(kind: ChangeKind) -> Action {
    match kind {
        ChangeKind::Created => Action::WatcherCreated,
        ChangeKind::Deleted => Action::WatcherDeleted,
        ChangeKind::Changed => Action::WatcherChanged,
        ChangeKind::Renamed => Action::WatcherRenamed,
    }
}

/// Push frame contents for a watch event.
///
/// Changes: `[kind: u8][path: string][oldPath: remaining bytes]`, the old
/// path present only for renames. Errors: `[message: string]`.
pub fn encode_event(event: &WatchEvent) -> ProtocolResult<(Action, Bytes)> {
    let mut w = PayloadWriter::new();
    match event {
        WatchEvent::Change(change) => {
            w.put_u8(kind_code(change.kind))
                .put_string(path_str(&change.path)?);
            if let Some(old) = &change.old_path {
                w.put_rest(path_str(old)?);
            }
            Ok((push_action(change.kind), w.finish()))
        }
        WatchEvent::Error(message) => {
            w.put_string(message);
            Ok((Action::WatcherError, w.finish()))
        }
    }
}

pub fn decode_event(action: Action, payload: Bytes) -> ProtocolResult<WatchEvent> {
    let mut r = PayloadReader::new(payload);
    if action == Action::WatcherError {
        let message = r.string()?;
        r.finish()?;
        return Ok(WatchEvent::Error(message));
    }
    if !action.is_push() {
        return Err(ProtocolError::invalid("push action", u8::from(action)));
    }

    let kind = kind_from_code(r.u8()?)?;
    if push_action(kind) != action {
        return Err(ProtocolError::invalid("change kind", kind_code(kind)));
    }
    let path = PathBuf::from(r.string()?);
    let event = if kind == ChangeKind::Renamed {
        let old_path = r.rest_string()?;
        if old_path.is_empty() {
            return Err(ProtocolError::Truncated {
                needed: 1,
                remaining: 0,
            });
        }
        ChangeEvent::renamed(old_path, path)
    } else {
        r.finish()?;
        ChangeEvent::plain(kind, path)
    };
    Ok(WatchEvent::Change(event))
}
