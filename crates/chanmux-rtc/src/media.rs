//! Media capability injected into a peer session.
//!
//! The session never touches devices or codecs itself; it asks the
//! capability for local media when it needs some and hands remote media
//! back for rendering.

use std::fmt;

use crate::error::CaptureError;

/// Opaque reference to a media stream owned by the capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Handle naming the stream received from `peer`.
    pub fn remote(peer: &str) -> Self {
        Self(format!("remote:{peer}"))
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait MediaCapability {
    fn capture_local_media(&mut self) -> Result<MediaHandle, CaptureError>;

    fn render_remote_media(&mut self, remote: &MediaHandle);

    /// Called once when a session that captured `local` ends.
    fn release_local_media(&mut self, local: MediaHandle) {
        let _ = local;
    }
}

/// Capability for signaling-only sessions: hands out a placeholder handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMedia;

impl MediaCapability for NoMedia {
    fn capture_local_media(&mut self) -> Result<MediaHandle, CaptureError> {
        Ok(MediaHandle::new("none"))
    }

    fn render_remote_media(&mut self, _remote: &MediaHandle) {}
}
