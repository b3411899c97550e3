//! File system error types.

use std::io;
use thiserror::Error;

/// File system error type.
///
/// Shared by every backend so a caller can swap backends without
/// changing how it matches on failures.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not implement this operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Malformed or unexpected frame from the peer. Fatal to the connection.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The connection dropped before the operation completed.
    #[error("disconnected")]
    Disconnected,

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,

    /// The operation did not complete before its deadline.
    #[error("timed out")]
    TimedOut,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotSupported error naming the operation.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a ProtocolViolation error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify an I/O error raised while operating on `path`.
    ///
    /// Kinds with a typed counterpart lose their `io::Error` wrapper; the
    /// rest stay as [`FsError::Io`] and count as transient.
    pub fn from_io(err: io::Error, path: impl std::fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_string()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.to_string()),
            io::ErrorKind::InvalidInput => Self::InvalidPath(path.to_string()),
            io::ErrorKind::Unsupported => Self::NotSupported(path.to_string()),
            _ => Self::Io(err),
        }
    }

    /// Whether a retry loop may try the operation again.
    ///
    /// Only raw I/O failures qualify (sharing violations and the like while
    /// another process is mid-write). Everything typed is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::PermissionDenied(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            FsError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::ProtocolViolation(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            FsError::Disconnected => {
                io::Error::new(io::ErrorKind::ConnectionAborted, "disconnected")
            }
            FsError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, "cancelled"),
            FsError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "timed out"),
            FsError::Io(e) => e,
            FsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// File system result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let err = FsError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a.txt");
        assert!(matches!(err, FsError::NotFound(ref p) if p == "/a.txt"));

        let err = FsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/b");
        assert!(matches!(err, FsError::PermissionDenied(_)));

        let err = FsError::from_io(io::Error::from(io::ErrorKind::WouldBlock), "/c");
        assert!(err.is_transient());
    }

    #[test]
    fn test_only_io_is_transient() {
        assert!(!FsError::not_found("x").is_transient());
        assert!(!FsError::Disconnected.is_transient());
        assert!(FsError::Io(io::Error::other("sharing violation")).is_transient());
    }

    #[test]
    fn test_into_io_error() {
        let io_err: io::Error = FsError::not_supported("write").into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);

        let io_err: io::Error = FsError::Disconnected.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
