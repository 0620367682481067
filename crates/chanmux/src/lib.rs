//! Channel-multiplexed event client with acknowledgments and peer-session
//! signaling.
//!
//! # Crate Structure
//!
//! - [`transport`]: message-oriented transports (Unix sockets, in-memory pairs)
//! - [`frame`]: Socket.IO 0.9 packet codec
//! - [`client`]: connection manager, channels, ack tracking (behind `client` feature)
//! - [`rtc`]: peer-session state machine (behind `rtc` feature)

/// Re-export transport types.
pub mod transport {
    pub use chanmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chanmux_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use chanmux_client::*;
}

/// Re-export peer-session types (requires `rtc` feature).
#[cfg(feature = "rtc")]
pub mod rtc {
    pub use chanmux_rtc::*;
}
