//! Channel-multiplexed event client.
//!
//! One [`ConnectionManager`] owns one transport and any number of
//! [`Channel`]s addressed by endpoint path. Channels emit named events,
//! optionally asking for an acknowledgment, and dispatch inbound events to
//! registered listeners. Transport loss purges pending acks and triggers
//! reconnect with backoff; joined channels rejoin automatically.
//!
//! The client is single-threaded and sans-IO: nothing here sleeps, spawns,
//! or requires an async runtime.

pub mod ack;
pub mod channel;
pub mod config;
mod dispatcher;
pub mod error;
pub mod event;
pub mod manager;
mod state;

pub use ack::{AckRegistry, AckStatus, AckToken, Continuation};
pub use channel::Channel;
pub use chanmux_frame::{Endpoint, Value};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ClientError, Result};
pub use event::{
    DisconnectReason, ErrorEvent, Event, EventKey, Payload, Responder, SystemEvent, SystemKind,
};
pub use manager::ConnectionManager;
pub use state::{ChannelState, ConnectionState, ListenerId};
