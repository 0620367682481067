//! Event frame codec for chanmux.
//!
//! Every logical event crosses the transport as one Socket.IO 0.9 text
//! packet:
//! - a numeric packet type (connect, event, ack, ...)
//! - an optional message id requesting an acknowledgment
//! - the endpoint (namespace path) of the channel it belongs to
//! - an optional, type-specific data segment
//!
//! Encoding and decoding are pure; nothing here touches I/O.

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod packet;

pub use codec::{decode, decode_str, encode, encode_to_string};
pub use endpoint::Endpoint;
pub use error::{FrameError, Result};
pub use packet::{AckMode, AckRequest, ErrorAdvice, ErrorReason, Packet, PacketKind};
pub use serde_json::Value;
