//! Protocol errors and the error-frame encoding.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use relayfs_core::FsError;
use thiserror::Error;

use crate::payload::{PayloadReader, PayloadWriter};

/// A frame or payload that does not follow the wire format.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame payload of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("negative payload length {0}")]
    NegativeLength(i32),

    #[error("unknown action {0}")]
    UnknownAction(u8),

    #[error("payload truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    pub fn invalid(what: &'static str, value: impl Into<i64>) -> Self {
        Self::InvalidValue {
            what,
            value: value.into(),
        }
    }
}

impl From<ProtocolError> for FsError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => FsError::Io(io),
            ProtocolError::InvalidPath(path) => FsError::InvalidPath(path.display().to_string()),
            other => FsError::protocol(other.to_string()),
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failure class carried in an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NotFound = 1,
    AccessDenied = 2,
    AlreadyExists = 3,
    NotSupported = 4,
    InvalidPath = 5,
    Io = 6,
    ProtocolViolation = 7,
    Other = 255,
}

impl ErrorCode {
    pub fn of(err: &FsError) -> Self {
        match err {
            FsError::NotFound(_) => ErrorCode::NotFound,
            FsError::PermissionDenied(_) => ErrorCode::AccessDenied,
            FsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            FsError::NotSupported(_) => ErrorCode::NotSupported,
            FsError::InvalidPath(_) | FsError::NotADirectory(_) | FsError::IsADirectory(_) => {
                ErrorCode::InvalidPath
            }
            FsError::Io(_) => ErrorCode::Io,
            FsError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            _ => ErrorCode::Other,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => ErrorCode::NotFound,
            2 => ErrorCode::AccessDenied,
            3 => ErrorCode::AlreadyExists,
            4 => ErrorCode::NotSupported,
            5 => ErrorCode::InvalidPath,
            6 => ErrorCode::Io,
            7 => ErrorCode::ProtocolViolation,
            _ => ErrorCode::Other,
        }
    }

    /// Rebuild a typed error around the server's message.
    pub fn into_error(self, message: String) -> FsError {
        match self {
            ErrorCode::NotFound => FsError::NotFound(message),
            ErrorCode::AccessDenied => FsError::PermissionDenied(message),
            ErrorCode::AlreadyExists => FsError::AlreadyExists(message),
            ErrorCode::NotSupported => FsError::NotSupported(message),
            ErrorCode::InvalidPath => FsError::InvalidPath(message),
            ErrorCode::Io => FsError::Io(io::Error::other(message)),
            ErrorCode::ProtocolViolation => FsError::ProtocolViolation(message),
            ErrorCode::Other => FsError::Other(message),
        }
    }
}

/// Payload of an error frame: `[code: u8][message: string]`.
pub fn encode_error(err: &FsError) -> Bytes {
    let mut w = PayloadWriter::new();
    w.put_u8(ErrorCode::of(err) as u8);
    w.put_string(&err.to_string());
    w.finish()
}

/// Typed error from an error frame's payload.
pub fn decode_error(payload: Bytes) -> ProtocolResult<FsError> {
    let mut r = PayloadReader::new(payload);
    let code = ErrorCode::from_byte(r.u8()?);
    let message = r.string()?;
    r.finish()?;
    Ok(code.into_error(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_keeps_kind() {
        let payload = encode_error(&FsError::not_found("/proj/App.axaml"));
        let err = decode_error(payload).unwrap();
        assert!(matches!(err, FsError::NotFound(ref m) if m.contains("/proj/App.axaml")));

        let payload = encode_error(&FsError::permission_denied("/etc/shadow"));
        assert!(matches!(decode_error(payload).unwrap(), FsError::PermissionDenied(_)));
    }

    #[test]
    fn test_unknown_code_is_other() {
        let mut w = PayloadWriter::new();
        w.put_u8(77);
        w.put_string("strange");
        let err = decode_error(w.finish()).unwrap();
        assert!(matches!(err, FsError::Other(ref m) if m == "strange"));
    }

    #[test]
    fn test_protocol_error_becomes_violation() {
        let err: FsError = ProtocolError::UnknownAction(9).into();
        assert!(matches!(err, FsError::ProtocolViolation(_)));
    }
}
