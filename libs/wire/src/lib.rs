//! Wire Protocol
//!
//! Message schema and frame codec shared by the binder client and any
//! server speaking the protocol. Messages are bincode-encoded; over
//! stream transports (TCP, Unix) each message is preceded by a 4-byte
//! big-endian length prefix, over WebSocket the transport's own
//! binary frames carry the bare body.

pub mod error;
pub mod framing;
pub mod message;
pub mod value;

pub use error::{Result, WireError};
pub use framing::{decode_body, encode_body, encode_frame, read_frame, write_frame};
pub use message::{
    next_id, AtomDecl, AtomId, AtomMode, ChannelId, CommandDecl, CommandId, ObjectId, WireMessage,
};
pub use value::WireValue;

/// Default cap on a single encoded message, shared by both framing
/// directions and the WebSocket path.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
