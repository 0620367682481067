//! Peer-session signaling over a chanmux channel.
//!
//! A [`PeerSession`] listens for and emits four ordinary channel events:
//! invite, descriptor, candidate and hangup. It drives an explicit state
//! machine and calls into an injected [`MediaCapability`] for local
//! capture and remote rendering.

pub mod error;
pub mod media;
pub mod session;
pub mod signal;

pub use error::{CaptureError, Result, SessionError};
pub use media::{MediaCapability, MediaHandle, NoMedia};
pub use session::{PeerSession, SessionState};
pub use signal::{SessionDescriptor, Signal, SignalNames};
