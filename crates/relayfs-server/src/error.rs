//! Server errors.

use std::io;

use relayfs_core::FsError;
use relayfs_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("unexpected frame: {0}")]
    Unexpected(String),

    #[error("file system error: {0}")]
    Fs(#[from] FsError),
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => ServerError::Io(io),
            other => ServerError::Protocol(other),
        }
    }
}
