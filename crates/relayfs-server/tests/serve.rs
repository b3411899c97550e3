//! Drives a server over an in-memory stream with hand-built frames.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relayfs_core::{ChangeEvent, FileSystem, MemoryFileSystem, WatchEvent, WatcherOptions};
use relayfs_protocol::messages::{
    decode_bool, decode_event, decode_paths, encode_path, encode_watcher_options,
};
use relayfs_protocol::{
    Action, EnumerateRequest, Frame, FrameCodec, PUSH_ID, SessionState, WatcherProperty, handshake,
};
use relayfs_server::{Server, ServerError};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const SECRET: &[u8] = b"correct horse";

type Client = Framed<DuplexStream, FrameCodec>;

fn start(backend: Arc<dyn FileSystem>) -> (Client, JoinHandle<Result<(), ServerError>>) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = Server::new(backend, SECRET);
    let task = tokio::spawn(async move { server.serve_connection(server_io).await });
    (Framed::new(client_io, FrameCodec), task)
}

async fn authenticate(client: &mut Client, secret: &[u8]) -> Option<Frame> {
    client
        .send(Frame::empty(PUSH_ID, Action::CloseWhenInputEnds))
        .await
        .unwrap();
    let hello = client.next().await.unwrap().unwrap();
    assert_eq!(hello.action, Action::Handshake);
    assert_ne!(hello.id, PUSH_ID);
    let proof = handshake::compute_proof(secret, &hello.payload);
    client
        .send(Frame::new(hello.id, Action::Handshake, proof.to_vec()))
        .await
        .unwrap();
    let reply = client.next().await?.ok()?;
    assert_eq!(reply.id, handshake::confirmation_id(hello.id));
    Some(reply)
}

async fn seeded() -> Arc<MemoryFileSystem> {
    let fs = MemoryFileSystem::new();
    fs.write_file("/proj/App.axaml", "<Window/>").await.unwrap();
    fs.write_file("/proj/Main.cs", "class Main {}").await.unwrap();
    Arc::new(fs)
}

#[tokio::test]
async fn test_handshake_and_queries() {
    let (mut client, task) = start(seeded().await);
    let ok = authenticate(&mut client, SECRET).await.unwrap();
    assert_eq!(ok.action, Action::KeepAlive);
    assert!(ok.payload.is_empty());

    client
        .send(Frame::empty(1, Action::GetSessionState))
        .await
        .unwrap();
    let state = client.next().await.unwrap().unwrap();
    let state = SessionState::decode(state.payload).unwrap();
    assert_eq!(state.rules.separator, '/');

    client
        .send(Frame::new(2, Action::FileExists, encode_path(Path::new("/proj/App.axaml")).unwrap()))
        .await
        .unwrap();
    let exists = client.next().await.unwrap().unwrap();
    assert_eq!(exists.id, 2);
    assert!(decode_bool(exists.payload).unwrap());

    let list = EnumerateRequest {
        path: "/proj".into(),
        pattern: "*.axaml".into(),
        search: relayfs_core::SearchOption::TopDirectoryOnly,
        kind: relayfs_core::EntryKind::Files,
    };
    client
        .send(Frame::new(3, Action::Enumerate, list.encode().unwrap()))
        .await
        .unwrap();
    let listed = client.next().await.unwrap().unwrap();
    assert_eq!(
        decode_paths(listed.payload).unwrap(),
        vec![std::path::PathBuf::from("/proj/App.axaml")]
    );

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wrong_secret_is_refused() {
    let (mut client, task) = start(seeded().await);
    assert!(authenticate(&mut client, b"wrong").await.is_none());
    assert!(matches!(task.await.unwrap(), Err(ServerError::Handshake(_))));
}

#[tokio::test]
async fn test_request_without_id_is_a_violation() {
    let (mut client, task) = start(seeded().await);
    authenticate(&mut client, SECRET).await.unwrap();
    client
        .send(Frame::new(PUSH_ID, Action::FileExists, encode_path(Path::new("/a")).unwrap()))
        .await
        .unwrap();
    assert!(matches!(task.await.unwrap(), Err(ServerError::Unexpected(_))));
}

#[tokio::test]
async fn test_watcher_pushes_and_properties() {
    let fs = seeded().await;
    let (mut client, _task) = start(fs.clone());
    authenticate(&mut client, SECRET).await.unwrap();

    let options = WatcherOptions::new("/proj");
    client
        .send(Frame::new(9, Action::CreateWatcher, encode_watcher_options(&options).unwrap()))
        .await
        .unwrap();
    let created = client.next().await.unwrap().unwrap();
    assert_eq!((created.id, created.action), (9, Action::CreateWatcher));

    fs.write_file("/proj/New.cs", "x").await.unwrap();
    let push = client.next().await.unwrap().unwrap();
    assert_eq!(push.id, PUSH_ID);
    assert_eq!(
        decode_event(push.action, push.payload).unwrap(),
        WatchEvent::Change(ChangeEvent::created("/proj/New.cs"))
    );

    // Narrow to *.axaml; the .cs change must not arrive.
    let filter = WatcherProperty::Filter("*.axaml".into());
    client
        .send(Frame::new(PUSH_ID, filter.action(), filter.encode().unwrap()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    fs.write_file("/proj/Main.cs", "changed").await.unwrap();
    fs.write_file("/proj/App.axaml", "<Window Title=\"x\"/>").await.unwrap();
    let push = client.next().await.unwrap().unwrap();
    assert_eq!(
        decode_event(push.action, push.payload).unwrap(),
        WatchEvent::Change(ChangeEvent::changed("/proj/App.axaml"))
    );
}

#[tokio::test]
async fn test_second_watcher_on_one_connection_fails() {
    let (mut client, _task) = start(seeded().await);
    authenticate(&mut client, SECRET).await.unwrap();
    let payload = encode_watcher_options(&WatcherOptions::new("/proj")).unwrap();

    client
        .send(Frame::new(1, Action::CreateWatcher, payload.clone()))
        .await
        .unwrap();
    assert_eq!(client.next().await.unwrap().unwrap().action, Action::CreateWatcher);

    client
        .send(Frame::new(2, Action::CreateWatcher, payload))
        .await
        .unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!((reply.id, reply.action), (2, Action::Error));
}
