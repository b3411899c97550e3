//! Framing: `[id: u16][action: u8][length: i32][payload]`, little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::action::Action;
use crate::error::ProtocolError;

/// Bytes before the payload.
pub const HEADER_LEN: usize = 2 + 1 + 4;

/// Largest payload either side accepts.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Request id of pushes and one-way frames.
pub const PUSH_ID: u16 = 0;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u16,
    pub action: Action,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: u16, action: Action, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            action,
            payload: payload.into(),
        }
    }

    /// A frame with no payload.
    pub fn empty(id: u16, action: Action) -> Self {
        Self::new(id, action, Bytes::new())
    }

    pub fn is_push(&self) -> bool {
        self.id == PUSH_ID
    }
}

/// Frame codec for `tokio_util::codec::Framed`.
///
/// Unknown actions, negative lengths and oversized payloads are errors;
/// the stream cannot be resynchronised after any of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let id = header.get_u16_le();
        let action_byte = header.get_u8();
        let len = header.get_i32_le();

        let len = usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len))?;
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        let action = Action::try_from(action_byte)?;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame {
            id,
            action,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = frame.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_u16_le(frame.id);
        dst.put_u8(frame.action.into());
        dst.put_i32_le(len as i32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = encode(Frame::new(0x0102, Action::FileExists, &b"xyz"[..]));
        assert_eq!(&buf[..], &[0x02, 0x01, 11, 3, 0, 0, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let full = encode(Frame::new(7, Action::OpenRead, &b"payload"[..]));
        let mut partial = BytesMut::from(&full[..HEADER_LEN + 3]);
        assert_eq!(FrameCodec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full[HEADER_LEN + 3..]);
        let frame = FrameCodec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame, Frame::new(7, Action::OpenRead, &b"payload"[..]));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_headers() {
        let mut negative = BytesMut::new();
        negative.put_u16_le(1);
        negative.put_u8(Action::KeepAlive.into());
        negative.put_i32_le(-5);
        assert!(matches!(
            FrameCodec.decode(&mut negative),
            Err(ProtocolError::NegativeLength(-5))
        ));

        let mut huge = BytesMut::new();
        huge.put_u16_le(1);
        huge.put_u8(Action::KeepAlive.into());
        huge.put_i32_le((MAX_PAYLOAD_LEN + 1) as i32);
        assert!(matches!(
            FrameCodec.decode(&mut huge),
            Err(ProtocolError::FrameTooLarge(_))
        ));

        let mut unknown = BytesMut::new();
        unknown.put_u16_le(1);
        unknown.put_u8(99);
        unknown.put_i32_le(0);
        assert!(matches!(
            FrameCodec.decode(&mut unknown),
            Err(ProtocolError::UnknownAction(99))
        ));
    }

    #[test]
    fn test_every_action_survives_encode_decode() {
        let actions: Vec<Action> = (0..=u8::MAX)
            .filter_map(|b| Action::try_from(b).ok())
            .collect();
        assert_eq!(actions.len(), 23);

        let payloads = [
            Bytes::new(),
            Bytes::from_static(b"\x00\xff relayfs"),
            Bytes::from(vec![0xa5u8; 1 << 20]),
        ];
        for action in actions {
            for id in [PUSH_ID, 1, u16::MAX] {
                for payload in &payloads {
                    let frame = Frame::new(id, action, payload.clone());
                    let mut buf = encode(frame.clone());
                    assert_eq!(FrameCodec.decode(&mut buf).unwrap(), Some(frame));
                    assert!(buf.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_largest_payload_is_accepted() {
        let frame = Frame::new(9, Action::OpenRead, vec![1u8; MAX_PAYLOAD_LEN]);
        let mut buf = encode(frame.clone());
        assert_eq!(FrameCodec.decode(&mut buf).unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_framed_stream_carries_back_to_back_frames() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, FrameCodec);
        let mut reader = FramedRead::new(server, FrameCodec);

        let frames = vec![
            Frame::empty(1, Action::CloseWhenInputEnds),
            Frame::new(2, Action::Handshake, vec![7u8; 200]),
            Frame::empty(PUSH_ID, Action::WatcherChanged),
        ];
        let expected = frames.clone();
        let send = tokio::spawn(async move {
            for frame in frames {
                writer.send(frame).await.unwrap();
            }
        });

        for want in expected {
            assert_eq!(reader.next().await.unwrap().unwrap(), want);
        }
        send.await.unwrap();
    }
}
