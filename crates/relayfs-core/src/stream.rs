//! Open-file streams.

use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

/// A stream returned by [`FileSystem::open`](crate::FileSystem::open).
///
/// Backends hand out whatever fits: a live `tokio::fs::File` for local
/// disk, a [`MemoryFile`] for cached or remote content.
pub trait FileStream: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin {}

impl<T> FileStream for T where T: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin {}

/// Read-only view over an immutable byte buffer.
///
/// Cloning the underlying `Bytes` is cheap, so many readers can share one
/// cached buffer. Writes fail with `PermissionDenied`.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    inner: Cursor<Bytes>,
}

impl MemoryFile {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    /// Total length of the buffer.
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole buffer, independent of the read position.
    pub fn bytes(&self) -> &Bytes {
        self.inner.get_ref()
    }
}

impl AsyncRead for MemoryFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for MemoryFile {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

impl AsyncWrite for MemoryFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "stream is read-only",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_file_reads_and_seeks() {
        let mut file = MemoryFile::new(Bytes::from_static(b"hello world"));
        let mut out = String::new();
        file.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");

        file.seek(SeekFrom::Start(6)).await.unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"world");
    }

    #[tokio::test]
    async fn test_memory_file_rejects_writes() {
        let mut file = MemoryFile::new(Bytes::from_static(b"x"));
        let err = file.write_all(b"y").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
