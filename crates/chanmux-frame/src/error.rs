/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The input is not a structurally valid packet.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The endpoint cannot be carried on the wire.
    #[error("invalid endpoint '{0}': must be empty or start with '/' and contain no ':'")]
    InvalidEndpoint(String),

    /// JSON serialization failed while encoding.
    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FrameError::MalformedFrame(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
