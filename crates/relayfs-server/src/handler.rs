//! Answers one request from the backend.

use bytes::Bytes;
use relayfs_core::{FileSystem, FsError, FsResult};
use relayfs_protocol::messages::{decode_path, encode_bool, encode_paths, encode_time};
use relayfs_protocol::{
    Action, EnumerateRequest, Frame, MAX_PAYLOAD_LEN, OpenRequest, SessionState, encode_error,
};
use tokio::io::AsyncReadExt;

/// The response frame for `request`: same id and action on success, an
/// error frame otherwise.
pub async fn respond(backend: &dyn FileSystem, request: Frame) -> Frame {
    let Frame { id, action, payload } = request;
    match answer(backend, action, payload).await {
        Ok(payload) => Frame::new(id, action, payload),
        Err(e) => {
            tracing::debug!(id, ?action, error = %e, "request failed");
            Frame::new(id, Action::Error, encode_error(&e))
        }
    }
}

async fn answer(backend: &dyn FileSystem, action: Action, payload: Bytes) -> FsResult<Bytes> {
    match action {
        Action::GetSessionState => {
            let state = SessionState {
                rules: backend.path_rules(),
                current_directory: backend.current_directory(),
            };
            Ok(state.encode()?)
        }
        Action::FileExists => {
            let path = decode_path(payload)?;
            Ok(encode_bool(backend.file_exists(&path).await?))
        }
        Action::DirectoryExists => {
            let path = decode_path(payload)?;
            Ok(encode_bool(backend.directory_exists(&path).await?))
        }
        Action::OpenRead => {
            let request = OpenRequest::decode(payload)?;
            if request.options.is_mutating() {
                return Err(FsError::not_supported(format!(
                    "{:?} open of {}",
                    request.options.mode,
                    request.path.display()
                )));
            }
            let mut stream = backend.open(&request.path, request.options).await?;
            let mut buf = Vec::new();
            stream
                .read_to_end(&mut buf)
                .await
                .map_err(|e| FsError::from_io(e, request.path.display()))?;
            if buf.len() > MAX_PAYLOAD_LEN {
                return Err(FsError::other(format!(
                    "{} is {} bytes, over the frame limit",
                    request.path.display(),
                    buf.len()
                )));
            }
            Ok(Bytes::from(buf))
        }
        Action::Enumerate => {
            let request = EnumerateRequest::decode(payload)?;
            let entries = backend
                .enumerate(&request.path, &request.pattern, request.search, request.kind)
                .await?;
            Ok(encode_paths(&entries)?)
        }
        Action::GetLastWriteTime => {
            let path = decode_path(payload)?;
            Ok(encode_time(backend.last_write_time(&path).await?))
        }
        Action::GetCreationTime => {
            let path = decode_path(payload)?;
            Ok(encode_time(backend.creation_time(&path).await?))
        }
        Action::GetLastAccessTime => {
            let path = decode_path(payload)?;
            Ok(encode_time(backend.last_access_time(&path).await?))
        }
        other => Err(FsError::not_supported(format!("{other:?} request"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use relayfs_core::{MemoryFileSystem, OpenOptions};
    use relayfs_protocol::decode_error;
    use relayfs_protocol::messages::{decode_bool, encode_path};

    async fn backend() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.write_file("/proj/App.axaml", "<Window/>").await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_exists_and_read() {
        let fs = backend().await;

        let reply = respond(
            &fs,
            Frame::new(5, Action::FileExists, encode_path(Path::new("/proj/App.axaml")).unwrap()),
        )
        .await;
        assert_eq!((reply.id, reply.action), (5, Action::FileExists));
        assert!(decode_bool(reply.payload).unwrap());

        let open = OpenRequest {
            path: "/proj/App.axaml".into(),
            options: OpenOptions::read_exclusive(),
        };
        let reply = respond(&fs, Frame::new(6, Action::OpenRead, open.encode().unwrap())).await;
        assert_eq!(&reply.payload[..], b"<Window/>");
    }

    #[tokio::test]
    async fn test_failures_become_error_frames() {
        let fs = backend().await;

        let reply = respond(
            &fs,
            Frame::new(7, Action::GetLastWriteTime, encode_path(Path::new("/missing")).unwrap()),
        )
        .await;
        assert_eq!((reply.id, reply.action), (7, Action::Error));
        assert!(decode_error(reply.payload).unwrap().is_not_found());

        let write = OpenRequest {
            path: "/proj/App.axaml".into(),
            options: OpenOptions::create(),
        };
        let reply = respond(&fs, Frame::new(8, Action::OpenRead, write.encode().unwrap())).await;
        assert!(matches!(
            decode_error(reply.payload).unwrap(),
            FsError::NotSupported(_)
        ));

        let reply = respond(&fs, Frame::new(9, Action::FileExists, Bytes::from_static(&[1]))).await;
        assert!(matches!(
            decode_error(reply.payload).unwrap(),
            FsError::ProtocolViolation(_)
        ));
    }
}
