//! Channel endpoints (namespace paths).
//!
//! The default namespace is the empty path. Named namespaces are
//! slash-prefixed paths such as `/chat`.

use std::borrow::Borrow;
use std::fmt;

use crate::error::{FrameError, Result};

/// Namespace path that addresses one channel on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

impl Endpoint {
    /// The default namespace.
    pub const fn root() -> Self {
        Endpoint(String::new())
    }

    /// Validate a locally chosen namespace path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path == "/" {
            return Ok(Self::root());
        }
        if path.contains(':') || !(path.is_empty() || path.starts_with('/')) {
            return Err(FrameError::InvalidEndpoint(path));
        }
        Ok(Endpoint(path))
    }

    /// Accept an endpoint exactly as it appeared on the wire.
    pub(crate) fn from_wire(path: &str) -> Self {
        Endpoint(path.to_string())
    }

    /// Returns true for the default namespace.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl Borrow<str> for Endpoint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = FrameError;

    fn try_from(path: &str) -> Result<Self> {
        Endpoint::new(path)
    }
}
