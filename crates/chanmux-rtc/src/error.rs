use crate::session::SessionState;

/// Media capture failed; the session stays where it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("media capture failed: {0}")]
pub struct CaptureError(pub String);

/// Errors that can occur in peer-session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is not valid in the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The media capability asked the session for media while capturing.
    #[error("media capability is already in use")]
    MediaBusy,

    /// A signaling event carried arguments of the wrong shape.
    #[error("malformed {signal} signal: {detail}")]
    MalformedSignal { signal: String, detail: String },

    #[error("channel error: {0}")]
    Client(#[from] chanmux_client::ClientError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
