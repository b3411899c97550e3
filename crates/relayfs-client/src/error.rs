//! Connection setup errors.

use std::io;

use relayfs_core::FsError;
use relayfs_protocol::ProtocolError;

/// Why a connection could not be established.
///
/// Once a connection is up, failures are reported as [`FsError`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid server name {0:?}")]
    ServerName(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection timed out")]
    Timeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl From<ConnectError> for FsError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Io(io) => FsError::Io(io),
            ConnectError::Timeout => FsError::TimedOut,
            ConnectError::Handshake(msg) => FsError::ProtocolViolation(msg),
            ConnectError::Protocol(p) => p.into(),
            ConnectError::Fs(fs) => fs,
            other => FsError::Other(other.to_string()),
        }
    }
}
