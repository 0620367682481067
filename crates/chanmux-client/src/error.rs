use chanmux_frame::Endpoint;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chanmux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chanmux_frame::FrameError),

    /// The channel has been disconnected and must be reconnected first.
    #[error("channel {0} is disconnected")]
    ChannelDisconnected(Endpoint),

    /// The connection is closed and no reconnect is pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Too many packets queued while the transport is down.
    #[error("outbound buffer full ({0} packets)")]
    BufferFull(usize),

    /// The pending acknowledgment was discarded before the remote answered.
    #[error("ack {0} discarded before a reply arrived")]
    AckDropped(u64),
}

pub type Result<T> = std::result::Result<T, ClientError>;
