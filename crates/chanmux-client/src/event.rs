//! Events delivered to channel listeners.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use chanmux_frame::{Endpoint, ErrorReason, Packet, Value};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::state::{deliver_pending, ChannelState, ConnectionState, SharedState};

/// Connection lifecycle events, disjoint from application event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    Connect,
    Disconnect,
    Reconnecting,
    Reconnect,
    Error,
}

impl SystemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Reconnecting => "reconnecting",
            Self::Reconnect => "reconnect",
            Self::Error => "error",
        }
    }
}

/// Key a listener is registered under.
///
/// System events, payload messages, and named application events live in
/// separate spaces: an application event called `"connect"` never reaches a
/// [`SystemKind::Connect`] listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    System(SystemKind),
    /// Plain text and JSON payloads.
    Message,
    Named(String),
    /// Every event delivered to the channel, after the listeners registered
    /// under the event's own key.
    Any,
}

impl From<SystemKind> for EventKey {
    fn from(kind: SystemKind) -> Self {
        Self::System(kind)
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System(kind) => write!(f, "system:{}", kind.as_str()),
            Self::Message => f.write_str("message"),
            Self::Named(name) => write!(f, "event:{name}"),
            Self::Any => f.write_str("*"),
        }
    }
}

/// Why a channel left the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect` or closed the manager.
    ClientDisconnect,
    /// The remote ended the channel or the whole connection.
    ServerDisconnect,
    /// The transport dropped underneath the connection.
    TransportClose(String),
    /// Nothing arrived within the configured heartbeat timeout.
    HeartbeatTimeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientDisconnect => f.write_str("io client disconnect"),
            Self::ServerDisconnect => f.write_str("io server disconnect"),
            Self::TransportClose(detail) if detail.is_empty() => f.write_str("transport close"),
            Self::TransportClose(detail) => write!(f, "transport close: {detail}"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
        }
    }
}

/// Payload of a `system:error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// The remote sent an error frame without reconnect advice.
    Server(Option<ErrorReason>),
    /// Every reconnect attempt failed; the connection is closed for good.
    ReconnectFailed { attempts: u32 },
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(Some(reason)) => write!(f, "server error: {}", reason.as_str()),
            Self::Server(None) => f.write_str("server error"),
            Self::ReconnectFailed { attempts } => {
                write!(f, "reconnect failed after {attempts} attempts")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    Connect,
    Disconnect { reason: DisconnectReason },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnect { attempts: u32 },
    Error(ErrorEvent),
}

impl SystemEvent {
    pub fn kind(&self) -> SystemKind {
        match self {
            Self::Connect => SystemKind::Connect,
            Self::Disconnect { .. } => SystemKind::Disconnect,
            Self::Reconnecting { .. } => SystemKind::Reconnecting,
            Self::Reconnect { .. } => SystemKind::Reconnect,
            Self::Error(_) => SystemKind::Error,
        }
    }
}

/// Body of a payload-only message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
}

/// One delivery to a listener.
#[derive(Debug, Clone)]
pub enum Event {
    System(SystemEvent),
    Message {
        payload: Payload,
        responder: Option<Responder>,
    },
    App {
        name: String,
        args: Vec<Value>,
        responder: Option<Responder>,
    },
}

impl Event {
    pub fn key(&self) -> EventKey {
        match self {
            Self::System(system) => EventKey::System(system.kind()),
            Self::Message { .. } => EventKey::Message,
            Self::App { name, .. } => EventKey::Named(name.clone()),
        }
    }

    /// Application event name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::App { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Application event arguments; empty for other events.
    pub fn args(&self) -> &[Value] {
        match self {
            Self::App { args, .. } => args,
            _ => &[],
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Message { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn system(&self) -> Option<&SystemEvent> {
        match self {
            Self::System(system) => Some(system),
            _ => None,
        }
    }

    /// Present when the sender asked for a data-carrying reply.
    pub fn responder(&self) -> Option<&Responder> {
        match self {
            Self::Message { responder, .. } | Self::App { responder, .. } => responder.as_ref(),
            Self::System(_) => None,
        }
    }
}

/// One-shot reply handle for an inbound frame that requested an ack.
///
/// Clones share the same shot. The reply is bound to the transport session
/// and channel membership it arrived on: once the transport drops or the
/// channel leaves, it is silently discarded.
#[derive(Clone)]
pub struct Responder {
    shared: Weak<SharedState>,
    endpoint: Endpoint,
    ack_id: u64,
    epoch: u64,
    used: Rc<Cell<bool>>,
}

impl Responder {
    pub(crate) fn new(shared: Weak<SharedState>, endpoint: Endpoint, ack_id: u64, epoch: u64) -> Self {
        Self {
            shared,
            endpoint,
            ack_id,
            epoch,
            used: Rc::new(Cell::new(false)),
        }
    }

    pub fn ack_id(&self) -> u64 {
        self.ack_id
    }

    /// Whether a reply was already sent through this handle or a clone.
    pub fn is_used(&self) -> bool {
        self.used.get()
    }

    /// Send the ack reply.
    ///
    /// Returns `Ok(false)` when the reply was already sent, the transport
    /// session it belongs to is gone, or the channel is no longer joined.
    pub fn respond(&self, args: Vec<Value>) -> Result<bool> {
        if self.used.replace(true) {
            warn!(endpoint = %self.endpoint, ack_id = self.ack_id, "ack reply already sent");
            return Ok(false);
        }
        let shared = self.shared.upgrade().ok_or(ClientError::ConnectionClosed)?;
        let result = {
            let mut state = shared.borrow_mut();
            let joined = state
                .channels
                .get(&self.endpoint)
                .is_some_and(|slot| slot.state == ChannelState::Connected);
            if state.state != ConnectionState::Open || state.epoch != self.epoch || !joined {
                debug!(
                    endpoint = %self.endpoint,
                    ack_id = self.ack_id,
                    "dropping ack reply, channel or session gone"
                );
                return Ok(false);
            }
            state.send_packet(Packet::ack_reply(
                self.endpoint.clone(),
                self.ack_id,
                args,
            ))
        };
        deliver_pending(&shared);
        result.map(|()| true)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("endpoint", &self.endpoint)
            .field("ack_id", &self.ack_id)
            .field("used", &self.used.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_named_keys_are_disjoint() {
        assert_ne!(EventKey::from("connect"), EventKey::from(SystemKind::Connect));
        assert_ne!(EventKey::from("message"), EventKey::Message);
        assert_ne!(EventKey::from("*"), EventKey::Any);
        assert_eq!(EventKey::Any.to_string(), "*");
    }

    #[test]
    fn disconnect_reason_strings() {
        assert_eq!(DisconnectReason::ClientDisconnect.to_string(), "io client disconnect");
        assert_eq!(DisconnectReason::ServerDisconnect.to_string(), "io server disconnect");
        assert_eq!(
            DisconnectReason::TransportClose(String::new()).to_string(),
            "transport close"
        );
        assert_eq!(
            DisconnectReason::TransportClose("eof".into()).to_string(),
            "transport close: eof"
        );
    }

    #[test]
    fn event_accessors() {
        let event = Event::App {
            name: "chat".into(),
            args: vec![Value::from("hi")],
            responder: None,
        };
        assert_eq!(event.key(), EventKey::from("chat"));
        assert_eq!(event.name(), Some("chat"));
        assert_eq!(event.args(), &[Value::from("hi")]);
        assert!(event.responder().is_none());

        let system = Event::System(SystemEvent::Reconnect { attempts: 2 });
        assert_eq!(system.key(), EventKey::System(SystemKind::Reconnect));
        assert!(system.args().is_empty());
    }
}
