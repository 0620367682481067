//! Message transport boundary for chanmux.
//!
//! The client core only needs an ordered, message-oriented link. This crate
//! provides the [`Transport`] and [`Connector`] seams plus three concrete
//! links:
//! - [`StreamTransport`] over any byte stream, delimiting messages with a
//!   small length-prefixed header
//! - Unix domain sockets via [`UnixConnector`] (Linux/macOS)
//! - [`MemoryTransport`] pairs for tests and demos

pub mod error;
pub mod framing;
pub mod memory;
pub mod stream;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use framing::{decode_message, encode_message, FramingConfig, DEFAULT_MAX_MESSAGE, HEADER_SIZE};
pub use memory::{MemoryConnector, MemoryTransport, RemoteEnd};
pub use stream::StreamTransport;
pub use traits::{Connector, Transport};

#[cfg(unix)]
pub use uds::{connect_unix, StreamConfig, UnixConnector};
