//! One client connection, from handshake to close.
//!
//! Requests are answered concurrently; every outgoing frame goes through a
//! single writer task. A `CreateWatcher` request turns the connection into
//! a push channel: events from the backend's watcher are written with id 0
//! and the client steers the watcher with one-way property frames.

use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use relayfs_core::{FileSystem, FileWatcher, FsError, WatchEvent};
use relayfs_protocol::messages::{decode_watcher_options, encode_event};
use relayfs_protocol::{Action, Frame, FrameCodec, PUSH_ID, WatcherProperty, encode_error, handshake};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;

use crate::constants::HANDSHAKE_TIMEOUT;
use crate::error::ServerError;
use crate::handler;

/// A backend watcher plus the task forwarding its events.
struct PushChannel {
    watcher: Box<dyn FileWatcher>,
    forward: JoinHandle<()>,
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

pub(crate) async fn serve<T>(
    backend: Arc<dyn FileSystem>,
    secret: Arc<[u8]>,
    io: T,
) -> Result<(), ServerError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(io, FrameCodec);
    let mut close_when_input_ends = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        server_handshake(&mut framed, &secret),
    )
    .await
    .map_err(|_| ServerError::Handshake("timed out".into()))??;

    let (sink, mut stream) = framed.split();
    let (out, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, out_rx));
    let mut requests = JoinSet::new();
    let mut push: Option<PushChannel> = None;

    let result = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Err(ServerError::from(e)),
            None => break Ok(()),
        };
        while requests.try_join_next().is_some() {}

        match frame.action {
            Action::KeepAlive => {}
            Action::CreateWatcher => {
                let reply = match create_push_channel(&*backend, &frame, push.is_some(), &out).await {
                    Ok(channel) => {
                        push = Some(channel);
                        Frame::empty(frame.id, Action::CreateWatcher)
                    }
                    Err(e) => Frame::new(frame.id, Action::Error, encode_error(&e)),
                };
                let _ = out.send(reply);
            }
            action if action.is_watcher_property() => {
                apply_property(push.as_ref(), frame, &out).await;
            }
            Action::CloseWhenInputEnds => close_when_input_ends = true,
            Action::Handshake | Action::Error => {
                break Err(ServerError::Unexpected(format!(
                    "{:?} after handshake",
                    frame.action
                )));
            }
            action if action.is_push() => {
                break Err(ServerError::Unexpected(format!("client sent push {action:?}")));
            }
            _ if frame.id == PUSH_ID => {
                break Err(ServerError::Unexpected(format!(
                    "{:?} request without an id",
                    frame.action
                )));
            }
            _ => {
                let backend = backend.clone();
                let out = out.clone();
                requests.spawn(async move {
                    let _ = out.send(handler::respond(&*backend, frame).await);
                });
            }
        }
    };

    if close_when_input_ends || result.is_err() {
        requests.abort_all();
    } else {
        while requests.join_next().await.is_some() {}
    }
    drop(push);
    drop(out);
    let _ = writer.await;
    result
}

/// Server half of the handshake. Returns whether the client asked for the
/// connection to close when its input ends.
async fn server_handshake<T>(
    framed: &mut Framed<T, FrameCodec>,
    secret: &[u8],
) -> Result<bool, ServerError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let id = handshake::handshake_id();
    let salt = handshake::generate_salt();
    framed
        .send(Frame::new(id, Action::Handshake, salt.to_vec()))
        .await?;

    let mut close_when_input_ends = false;
    loop {
        let frame = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(ServerError::Handshake("client closed the connection".into())),
        };
        match (frame.action, frame.id) {
            (Action::CloseWhenInputEnds, PUSH_ID) => close_when_input_ends = true,
            (Action::KeepAlive, PUSH_ID) => {}
            (Action::Handshake, got) if got == id => {
                if !handshake::verify_proof(secret, &salt, &frame.payload) {
                    return Err(ServerError::Handshake("proof does not match".into()));
                }
                framed
                    .send(Frame::empty(handshake::confirmation_id(id), Action::KeepAlive))
                    .await?;
                tracing::debug!(id, "client authenticated");
                return Ok(close_when_input_ends);
            }
            (action, got) => {
                return Err(ServerError::Handshake(format!(
                    "expected handshake on id {id}, got {action:?} on id {got}"
                )));
            }
        }
    }
}

async fn write_loop<T>(
    mut sink: SplitSink<Framed<T, FrameCodec>, Frame>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::debug!(error = %e, "write failed, dropping connection output");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn create_push_channel(
    backend: &dyn FileSystem,
    frame: &Frame,
    already_watching: bool,
    out: &mpsc::UnboundedSender<Frame>,
) -> Result<PushChannel, FsError> {
    if already_watching {
        return Err(FsError::other("connection already carries a watcher"));
    }
    let options = decode_watcher_options(frame.payload.clone())?;
    tracing::debug!(path = %options.path.display(), recursive = options.recursive, "creating watcher");
    let watcher = backend.create_watcher(options).await?;
    let events = watcher.subscribe();
    let forward = tokio::spawn(forward_events(events, out.clone()));
    Ok(PushChannel { watcher, forward })
}

async fn forward_events(
    mut events: broadcast::Receiver<WatchEvent>,
    out: mpsc::UnboundedSender<Frame>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "watcher push lagged, events dropped");
                WatchEvent::Error(format!("{skipped} events dropped"))
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let (action, payload) = match encode_event(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "watch event cannot be encoded, skipped");
                continue;
            }
        };
        if out.send(Frame::new(PUSH_ID, action, payload)).is_err() {
            return;
        }
    }
}

async fn apply_property(push: Option<&PushChannel>, frame: Frame, out: &mpsc::UnboundedSender<Frame>) {
    let Some(channel) = push else {
        tracing::warn!(action = ?frame.action, "watcher property without a watcher");
        return;
    };
    let property = match WatcherProperty::decode(frame.action, frame.payload) {
        Ok(property) => property,
        Err(e) => {
            tracing::warn!(error = %e, "malformed watcher property");
            return;
        }
    };
    let watcher = &channel.watcher;
    let result = match property {
        WatcherProperty::Path(path) => watcher.set_path(path).await,
        WatcherProperty::Enabled(v) => watcher.set_enabled(v).await,
        WatcherProperty::Recursive(v) => watcher.set_recursive(v).await,
        WatcherProperty::Filter(filter) => watcher.set_filter(filter).await,
        WatcherProperty::NotifyFilter(nf) => watcher.set_notify_filter(nf).await,
    };
    if let Err(e) = result {
        // No response frame exists for properties; surface it as a push.
        tracing::warn!(error = %e, "watcher property update failed");
        if let Ok((action, payload)) = encode_event(&WatchEvent::Error(e.to_string())) {
            let _ = out.send(Frame::new(PUSH_ID, action, payload));
        }
    }
}
