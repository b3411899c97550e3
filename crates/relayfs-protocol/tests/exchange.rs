//! A request/response exchange over a framed in-memory stream.

use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use relayfs_core::{FsError, OpenOptions, WatchEvent, ChangeEvent};
use relayfs_protocol::messages::{decode_bool, decode_event, encode_bool, encode_event};
use relayfs_protocol::{
    Action, Frame, FrameCodec, OpenRequest, PUSH_ID, decode_error, encode_error, handshake,
};
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_handshake_then_requests() {
    let (client_io, server_io) = tokio::io::duplex(1024);
    let mut client = Framed::new(client_io, FrameCodec);
    let mut server = Framed::new(server_io, FrameCodec);
    let secret = b"shared secret";

    let server_task = tokio::spawn(async move {
        let salt = handshake::generate_salt();
        let id = handshake::handshake_id();
        server
            .send(Frame::new(id, Action::Handshake, salt.to_vec()))
            .await
            .unwrap();
        let reply = server.next().await.unwrap().unwrap();
        assert_eq!(reply.id, id);
        assert!(handshake::verify_proof(secret, &salt, &reply.payload));
        server
            .send(Frame::empty(handshake::confirmation_id(id), Action::KeepAlive))
            .await
            .unwrap();

        // Two requests, answered in reverse order.
        let first = server.next().await.unwrap().unwrap();
        let second = server.next().await.unwrap().unwrap();
        let open = OpenRequest::decode(second.payload.clone()).unwrap();
        assert_eq!(open.path, PathBuf::from("/missing"));
        server
            .send(Frame::new(second.id, Action::Error, encode_error(&FsError::not_found("/missing"))))
            .await
            .unwrap();
        server
            .send(Frame::new(first.id, first.action, encode_bool(true)))
            .await
            .unwrap();

        let (action, payload) = encode_event(&WatchEvent::Change(ChangeEvent::created("/a"))).unwrap();
        server.send(Frame::new(PUSH_ID, action, payload)).await.unwrap();
    });

    let hello = client.next().await.unwrap().unwrap();
    assert_eq!(hello.action, Action::Handshake);
    let proof = handshake::compute_proof(secret, &hello.payload);
    client
        .send(Frame::new(hello.id, Action::Handshake, proof.to_vec()))
        .await
        .unwrap();
    let ok = client.next().await.unwrap().unwrap();
    assert_eq!(ok.action, Action::KeepAlive);
    assert_eq!(ok.id, hello.id.wrapping_add(1));
    assert!(ok.payload.is_empty());

    client
        .send(Frame::new(10, Action::FileExists, relayfs_protocol::messages::encode_path("/a".as_ref()).unwrap()))
        .await
        .unwrap();
    let open = OpenRequest {
        path: PathBuf::from("/missing"),
        options: OpenOptions::read_exclusive(),
    };
    client.send(Frame::new(11, Action::OpenRead, open.encode().unwrap())).await.unwrap();

    let error = client.next().await.unwrap().unwrap();
    assert_eq!((error.id, error.action), (11, Action::Error));
    assert!(decode_error(error.payload).unwrap().is_not_found());

    let exists = client.next().await.unwrap().unwrap();
    assert_eq!(exists.id, 10);
    assert!(decode_bool(exists.payload).unwrap());

    let push = client.next().await.unwrap().unwrap();
    assert!(push.is_push());
    assert_eq!(
        decode_event(push.action, push.payload).unwrap(),
        WatchEvent::Change(ChangeEvent::created("/a"))
    );

    server_task.await.unwrap();
}
