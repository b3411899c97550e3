//! Frame action types.

use crate::error::ProtocolError;

/// What a frame asks for or carries.
///
/// Requests and their responses share an action; pushes from a watcher
/// connection use the `Watcher*` event actions with request id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    // ── Control ──
    KeepAlive = 0,
    CloseWhenInputEnds = 1,
    Handshake = 2,
    Error = 3,

    // ── Queries ──
    GetSessionState = 10,
    FileExists = 11,
    DirectoryExists = 12,
    OpenRead = 13,
    Enumerate = 14,
    GetLastWriteTime = 15,
    GetCreationTime = 16,
    GetLastAccessTime = 17,

    // ── Watcher setup (watcher connection only) ──
    CreateWatcher = 30,
    SetWatcherPath = 31,
    SetWatcherEnabled = 32,
    SetWatcherRecursive = 33,
    SetWatcherFilter = 34,
    SetWatcherNotifyFilter = 35,

    // ── Watcher pushes ──
    WatcherCreated = 40,
    WatcherDeleted = 41,
    WatcherChanged = 42,
    WatcherRenamed = 43,
    WatcherError = 44,
}

impl Action {
    /// Whether the action is an unsolicited server push.
    pub fn is_push(self) -> bool {
        matches!(
            self,
            Action::WatcherCreated
                | Action::WatcherDeleted
                | Action::WatcherChanged
                | Action::WatcherRenamed
                | Action::WatcherError
        )
    }

    /// Whether the action is a one-way watcher property update.
    pub fn is_watcher_property(self) -> bool {
        matches!(
            self,
            Action::SetWatcherPath
                | Action::SetWatcherEnabled
                | Action::SetWatcherRecursive
                | Action::SetWatcherFilter
                | Action::SetWatcherNotifyFilter
        )
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Action::KeepAlive,
            1 => Action::CloseWhenInputEnds,
            2 => Action::Handshake,
            3 => Action::Error,
            10 => Action::GetSessionState,
            11 => Action::FileExists,
            12 => Action::DirectoryExists,
            13 => Action::OpenRead,
            14 => Action::Enumerate,
            15 => Action::GetLastWriteTime,
            16 => Action::GetCreationTime,
            17 => Action::GetLastAccessTime,
            30 => Action::CreateWatcher,
            31 => Action::SetWatcherPath,
            32 => Action::SetWatcherEnabled,
            33 => Action::SetWatcherRecursive,
            34 => Action::SetWatcherFilter,
            35 => Action::SetWatcherNotifyFilter,
            40 => Action::WatcherCreated,
            41 => Action::WatcherDeleted,
            42 => Action::WatcherChanged,
            43 => Action::WatcherRenamed,
            44 => Action::WatcherError,
            other => return Err(ProtocolError::UnknownAction(other)),
        })
    }
}
