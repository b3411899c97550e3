//! Wire format shared by the relayfs client and server.
//!
//! Every frame is `[id: u16][action: u8][length: i32][payload]`, all
//! little-endian. Id 0 marks pushes; any other id pairs a response with
//! the request that carried it.

pub mod action;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod messages;
pub mod payload;

pub use action::Action;
pub use error::{ErrorCode, ProtocolError, ProtocolResult, decode_error, encode_error};
pub use frame::{Frame, FrameCodec, HEADER_LEN, MAX_PAYLOAD_LEN, PUSH_ID};
pub use messages::{EnumerateRequest, OpenRequest, SessionState, WatcherProperty};
pub use payload::{PayloadReader, PayloadWriter};
