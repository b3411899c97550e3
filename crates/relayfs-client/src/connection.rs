//! One framed connection to a server.
//!
//! ```text
//!   callers ──request()──▶ write lock ──▶ sink ──────────▶ server
//!      ▲                                                      │
//!      └── oneshot ◀── pending[id] ◀── read loop ◀── stream ◀─┘
//!                                        │
//!                                        └── id 0 ──▶ push channel
//! ```
//!
//! Writes from concurrent callers serialise on an async lock so frames never
//! interleave. A single read loop completes the pending request whose id a
//! response carries. When the stream ends, every pending request fails with
//! [`FsError::Disconnected`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relayfs_core::{FsError, FsResult};
use relayfs_protocol::{Action, Frame, FrameCodec, PUSH_ID, ProtocolError, decode_error, handshake};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ConnectError;

/// A duplex byte stream a connection runs over: TLS, TCP, or in-memory.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type FramedTransport = Framed<Box<dyn Transport>, FrameCodec>;
type Reply = oneshot::Sender<FsResult<Frame>>;

// ============================================================================
// Pending requests
// ============================================================================

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<u16, Reply>,
    last_id: u16,
    closed: bool,
}

impl PendingTable {
    /// Next id that is neither 0 nor still awaiting a response.
    fn allocate(&mut self) -> FsResult<u16> {
        for _ in 0..=u16::MAX {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != PUSH_ID && !self.waiting.contains_key(&self.last_id) {
                return Ok(self.last_id);
            }
        }
        Err(FsError::other("every request id is in flight"))
    }
}

#[derive(Default)]
struct Shared {
    pending: Mutex<PendingTable>,
}

impl Shared {
    fn register(&self) -> FsResult<(u16, oneshot::Receiver<FsResult<Frame>>)> {
        let mut table = self.pending.lock();
        if table.closed {
            return Err(FsError::Disconnected);
        }
        let id = table.allocate()?;
        let (tx, rx) = oneshot::channel();
        table.waiting.insert(id, tx);
        Ok((id, rx))
    }

    fn complete(&self, id: u16) -> Option<Reply> {
        self.pending.lock().waiting.remove(&id)
    }

    /// Close the table and fail everything in it.
    fn fail_all(&self) {
        let drained: Vec<Reply> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.waiting.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing pending requests");
        }
        for tx in drained {
            let _ = tx.send(Err(FsError::Disconnected));
        }
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    fn in_flight(&self) -> usize {
        self.pending.lock().waiting.len()
    }
}

/// Drops the pending entry if the caller stops waiting early.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u16,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.complete(self.id);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// An authenticated connection with request correlation.
pub struct Connection {
    sink: tokio::sync::Mutex<SplitSink<FramedTransport, Frame>>,
    shared: Arc<Shared>,
    pushes: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("in_flight", &self.shared.in_flight())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl Connection {
    /// Run the client half of connection setup over `transport`.
    ///
    /// Asks the server to close once our input ends, answers the server's
    /// salt with a proof of `secret`, and waits for the confirming
    /// keep-alive. The whole exchange is bounded by the connect timeout.
    pub async fn establish(
        transport: impl Transport,
        secret: &[u8],
        config: &ClientConfig,
    ) -> Result<Self, ConnectError> {
        let transport: Box<dyn Transport> = Box::new(transport);
        let mut framed = Framed::new(transport, FrameCodec);

        tokio::time::timeout(config.connect_timeout(), client_handshake(&mut framed, secret))
            .await
            .map_err(|_| ConnectError::Timeout)??;

        let (sink, stream) = framed.split();
        let shared = Arc::new(Shared::default());
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(stream, shared.clone(), push_tx));

        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            shared,
            pushes: Mutex::new(Some(push_rx)),
            reader,
            request_timeout: config.request_timeout(),
        })
    }

    /// Send a request and wait for its response payload, bounded by the
    /// configured request timeout.
    pub async fn request(&self, action: Action, payload: Bytes) -> FsResult<Bytes> {
        self.request_with(action, payload, self.request_timeout, &CancellationToken::new())
            .await
    }

    /// Send a request and wait for its response payload.
    ///
    /// Timing out or cancelling stops the wait but not a write already in
    /// progress; other requests on the connection are unaffected.
    pub async fn request_with(
        &self,
        action: Action,
        payload: Bytes,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FsResult<Bytes> {
        let (id, rx) = self.shared.register()?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        self.write(Frame::new(id, action, payload)).await?;

        let frame = tokio::select! {
            reply = rx => reply.unwrap_or(Err(FsError::Disconnected))?,
            _ = tokio::time::sleep(timeout) => {
                tracing::debug!(id, ?action, "request timed out");
                return Err(FsError::TimedOut);
            }
            _ = cancel.cancelled() => return Err(FsError::Cancelled),
        };

        if frame.action != action {
            return Err(FsError::protocol(format!(
                "request {id} sent as {action:?} answered with {:?}",
                frame.action
            )));
        }
        Ok(frame.payload)
    }

    /// Send a frame that has no response. Returns once it is written.
    pub async fn send_one_way(&self, action: Action, payload: Bytes) -> FsResult<()> {
        if self.shared.is_closed() {
            return Err(FsError::Disconnected);
        }
        self.write(Frame::new(PUSH_ID, action, payload)).await
    }

    async fn write(&self, frame: Frame) -> FsResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await.map_err(|e| {
            tracing::debug!(error = %e, "frame write failed");
            match e {
                ProtocolError::Io(_) => FsError::Disconnected,
                other => other.into(),
            }
        })
    }

    /// Frames the server pushed with id 0. Can be taken once.
    pub fn take_pushes(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.pushes.lock().take()
    }

    /// Close the write side and fail everything still pending.
    pub async fn close(&self) {
        self.shared.fail_all();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "error closing connection");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.shared.fail_all();
    }
}

async fn client_handshake(framed: &mut FramedTransport, secret: &[u8]) -> Result<(), ConnectError> {
    framed
        .send(Frame::empty(PUSH_ID, Action::CloseWhenInputEnds))
        .await?;

    let hello = next_frame(framed).await?;
    if hello.action != Action::Handshake || hello.id == PUSH_ID {
        return Err(ConnectError::Handshake(format!(
            "expected handshake, got {:?} on id {}",
            hello.action, hello.id
        )));
    }

    let proof = handshake::compute_proof(secret, &hello.payload);
    framed
        .send(Frame::new(hello.id, Action::Handshake, proof.to_vec()))
        .await?;

    let confirm = next_frame(framed).await?;
    let expected_id = handshake::confirmation_id(hello.id);
    if confirm.action != Action::KeepAlive
        || confirm.id != expected_id
        || !confirm.payload.is_empty()
    {
        return Err(ConnectError::Handshake(format!(
            "expected empty keep-alive on id {expected_id}, got {:?} on id {} ({} bytes)",
            confirm.action,
            confirm.id,
            confirm.payload.len()
        )));
    }
    tracing::debug!(id = hello.id, "handshake complete");
    Ok(())
}

async fn next_frame(framed: &mut FramedTransport) -> Result<Frame, ConnectError> {
    match framed.next().await {
        Some(frame) => Ok(frame?),
        None => Err(ConnectError::Handshake("server closed the connection".into())),
    }
}

async fn read_loop(
    mut stream: SplitStream<FramedTransport>,
    shared: Arc<Shared>,
    pushes: mpsc::UnboundedSender<Frame>,
) {
    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(ProtocolError::Io(e))) => {
                tracing::debug!(error = %e, "connection read failed");
                break;
            }
            Some(Err(e)) => {
                // The stream cannot be resynchronised after a bad header.
                tracing::warn!(error = %e, "protocol violation, closing connection");
                break;
            }
            None => {
                tracing::debug!("connection closed by server");
                break;
            }
        };

        if frame.id == PUSH_ID {
            match frame.action {
                Action::KeepAlive => {}
                _ => {
                    let _ = pushes.send(frame);
                }
            }
            continue;
        }

        let Some(reply) = shared.complete(frame.id) else {
            tracing::debug!(id = frame.id, action = ?frame.action, "response to no pending request");
            continue;
        };
        let result = if frame.action == Action::Error {
            Err(decode_error(frame.payload).unwrap_or_else(FsError::from))
        } else {
            Ok(frame)
        };
        let _ = reply.send(result);
    }
    shared.fail_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayfs_protocol::messages::{decode_path, encode_bool, encode_path};
    use std::path::Path;

    type ServerSide = Framed<tokio::io::DuplexStream, FrameCodec>;

    /// Connection plus the raw server end, past the handshake.
    async fn pair(secret: &'static [u8]) -> (Connection, ServerSide) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec);
            let close = framed.next().await.unwrap().unwrap();
            assert_eq!(close.action, Action::CloseWhenInputEnds);
            let salt = handshake::generate_salt();
            framed
                .send(Frame::new(41, Action::Handshake, salt.to_vec()))
                .await
                .unwrap();
            let proof = framed.next().await.unwrap().unwrap();
            assert!(handshake::verify_proof(secret, &salt, &proof.payload));
            framed.send(Frame::empty(42, Action::KeepAlive)).await.unwrap();
            framed
        });
        let conn = Connection::establish(client_io, secret, &ClientConfig::default())
            .await
            .unwrap();
        (conn, server.await.unwrap())
    }

    #[test]
    fn test_id_allocation_skips_zero_and_in_flight() {
        let mut table = PendingTable {
            last_id: u16::MAX - 1,
            ..Default::default()
        };
        let (tx, _rx) = oneshot::channel();
        table.waiting.insert(1, tx);
        assert_eq!(table.allocate().unwrap(), u16::MAX);
        assert_eq!(table.allocate().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_confirmation_id() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec);
            let _close = framed.next().await;
            framed
                .send(Frame::new(7, Action::Handshake, vec![1u8; 32]))
                .await
                .unwrap();
            let _proof = framed.next().await;
            framed.send(Frame::empty(9, Action::KeepAlive)).await.unwrap();
            let _ = framed.next().await;
        });
        let err = Connection::establish(client_io, b"k", &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_empty_keep_alive() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec);
            let _close = framed.next().await;
            framed
                .send(Frame::new(7, Action::Handshake, vec![1u8; 32]))
                .await
                .unwrap();
            let _proof = framed.next().await;
            framed
                .send(Frame::new(8, Action::KeepAlive, &b"x"[..]))
                .await
                .unwrap();
            let _ = framed.next().await;
        });
        let err = Connection::establish(client_io, b"k", &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (conn, mut server) = pair(b"secret").await;
        let conn = Arc::new(conn);

        let mut calls = Vec::new();
        for n in 0..8 {
            let conn = conn.clone();
            calls.push(tokio::spawn(async move {
                let path = format!("/f{n}");
                let reply = conn
                    .request(Action::FileExists, encode_path(Path::new(&path)).unwrap())
                    .await
                    .unwrap();
                (n, reply)
            }));
        }

        let mut received = Vec::new();
        for _ in 0..8 {
            received.push(server.next().await.unwrap().unwrap());
        }
        // Answer in reverse, true only for even-numbered files.
        for frame in received.into_iter().rev() {
            let path = decode_path(frame.payload).unwrap();
            let n: u32 = path.to_string_lossy()[2..].parse().unwrap();
            server
                .send(Frame::new(frame.id, frame.action, encode_bool(n % 2 == 0)))
                .await
                .unwrap();
        }

        for call in calls {
            let (n, reply) = call.await.unwrap();
            assert_eq!(&reply[..], &[(n % 2 == 0) as u8]);
        }
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_frame_fails_only_its_request() {
        let (conn, mut server) = pair(b"secret").await;
        let conn = Arc::new(conn);

        let failing = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.request(Action::GetLastWriteTime, encode_path(Path::new("/gone")).unwrap())
                    .await
            })
        };
        let first = server.next().await.unwrap().unwrap();
        let passing = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.request(Action::FileExists, encode_path(Path::new("/here")).unwrap()).await
            })
        };
        let second = server.next().await.unwrap().unwrap();

        server
            .send(Frame::new(
                first.id,
                Action::Error,
                relayfs_protocol::encode_error(&FsError::not_found("/gone")),
            ))
            .await
            .unwrap();
        server
            .send(Frame::new(second.id, second.action, encode_bool(true)))
            .await
            .unwrap();

        assert!(failing.await.unwrap().unwrap_err().is_not_found());
        assert_eq!(&passing.await.unwrap().unwrap()[..], &[1]);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_timeout_and_cancel_are_local() {
        let (conn, mut server) = pair(b"secret").await;

        let err = conn
            .request_with(
                Action::FileExists,
                encode_path(Path::new("/slow")).unwrap(),
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::TimedOut));

        let token = CancellationToken::new();
        token.cancel();
        let err = conn
            .request_with(
                Action::FileExists,
                encode_path(Path::new("/slow")).unwrap(),
                Duration::from_secs(5),
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Cancelled));
        assert_eq!(conn.in_flight(), 0);

        // A late answer to the abandoned request is ignored.
        let stale = server.next().await.unwrap().unwrap();
        server
            .send(Frame::new(stale.id, stale.action, encode_bool(true)))
            .await
            .unwrap();
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_pushes_are_routed_separately() {
        let (conn, mut server) = pair(b"secret").await;
        let mut pushes = conn.take_pushes().unwrap();
        assert!(conn.take_pushes().is_none());

        server
            .send(Frame::empty(PUSH_ID, Action::KeepAlive))
            .await
            .unwrap();
        server
            .send(Frame::new(PUSH_ID, Action::WatcherChanged, &b"x"[..]))
            .await
            .unwrap();
        let push = pushes.recv().await.unwrap();
        assert_eq!(push.action, Action::WatcherChanged);
    }
}
