use serde_json::Value;

use crate::endpoint::Endpoint;

/// Wire type codes.
pub const DISCONNECT: u8 = 0;
pub const CONNECT: u8 = 1;
pub const HEARTBEAT: u8 = 2;
pub const MESSAGE: u8 = 3;
pub const JSON: u8 = 4;
pub const EVENT: u8 = 5;
pub const ACK: u8 = 6;
pub const ERROR: u8 = 7;
pub const NOOP: u8 = 8;

/// How the sender of a packet expects it to be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Bare id: the receiving client acks automatically with no arguments.
    Auto,
    /// Id followed by `+`: the application answers with arguments.
    Data,
}

/// Ack request carried by an outbound or inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    pub id: u64,
    pub mode: AckMode,
}

/// Server-side error reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    TransportNotSupported,
    ClientNotHandshaken,
    Unauthorized,
    Other(u32),
}

impl ErrorReason {
    pub fn code(self) -> u32 {
        match self {
            ErrorReason::TransportNotSupported => 0,
            ErrorReason::ClientNotHandshaken => 1,
            ErrorReason::Unauthorized => 2,
            ErrorReason::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ErrorReason::TransportNotSupported,
            1 => ErrorReason::ClientNotHandshaken,
            2 => ErrorReason::Unauthorized,
            other => ErrorReason::Other(other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::TransportNotSupported => "transport not supported",
            ErrorReason::ClientNotHandshaken => "client not handshaken",
            ErrorReason::Unauthorized => "unauthorized",
            ErrorReason::Other(_) => "unknown",
        }
    }
}

/// Advice attached to a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAdvice {
    Reconnect,
    Other(u32),
}

impl ErrorAdvice {
    pub fn code(self) -> u32 {
        match self {
            ErrorAdvice::Reconnect => 0,
            ErrorAdvice::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ErrorAdvice::Reconnect,
            other => ErrorAdvice::Other(other),
        }
    }
}

/// Packet body, one variant per wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketKind {
    Disconnect,
    Connect {
        query: String,
    },
    Heartbeat,
    Message {
        data: String,
    },
    Json {
        data: Value,
    },
    Event {
        name: String,
        args: Vec<Value>,
    },
    Ack {
        ack_id: u64,
        args: Vec<Value>,
    },
    Error {
        reason: Option<ErrorReason>,
        advice: Option<ErrorAdvice>,
    },
    Noop,
}

impl PacketKind {
    /// Wire type code.
    pub fn code(&self) -> u8 {
        match self {
            PacketKind::Disconnect => DISCONNECT,
            PacketKind::Connect { .. } => CONNECT,
            PacketKind::Heartbeat => HEARTBEAT,
            PacketKind::Message { .. } => MESSAGE,
            PacketKind::Json { .. } => JSON,
            PacketKind::Event { .. } => EVENT,
            PacketKind::Ack { .. } => ACK,
            PacketKind::Error { .. } => ERROR,
            PacketKind::Noop => NOOP,
        }
    }

    /// Human-readable type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            PacketKind::Disconnect => "disconnect",
            PacketKind::Connect { .. } => "connect",
            PacketKind::Heartbeat => "heartbeat",
            PacketKind::Message { .. } => "message",
            PacketKind::Json { .. } => "json",
            PacketKind::Event { .. } => "event",
            PacketKind::Ack { .. } => "ack",
            PacketKind::Error { .. } => "error",
            PacketKind::Noop => "noop",
        }
    }
}

/// One event frame: the unit crossing the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// The channel this packet belongs to.
    pub endpoint: Endpoint,
    /// Ack requested by the sender, if any.
    pub ack: Option<AckRequest>,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new(endpoint: Endpoint, kind: PacketKind) -> Self {
        Self {
            endpoint,
            ack: None,
            kind,
        }
    }

    pub fn connect(endpoint: Endpoint) -> Self {
        Self::new(
            endpoint,
            PacketKind::Connect {
                query: String::new(),
            },
        )
    }

    pub fn disconnect(endpoint: Endpoint) -> Self {
        Self::new(endpoint, PacketKind::Disconnect)
    }

    pub fn heartbeat() -> Self {
        Self::new(Endpoint::root(), PacketKind::Heartbeat)
    }

    pub fn message(endpoint: Endpoint, data: impl Into<String>) -> Self {
        Self::new(endpoint, PacketKind::Message { data: data.into() })
    }

    pub fn json(endpoint: Endpoint, data: Value) -> Self {
        Self::new(endpoint, PacketKind::Json { data })
    }

    pub fn event(endpoint: Endpoint, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(
            endpoint,
            PacketKind::Event {
                name: name.into(),
                args,
            },
        )
    }

    pub fn ack_reply(endpoint: Endpoint, ack_id: u64, args: Vec<Value>) -> Self {
        Self::new(endpoint, PacketKind::Ack { ack_id, args })
    }

    /// Attach an ack request.
    pub fn with_ack(mut self, id: u64, mode: AckMode) -> Self {
        self.ack = Some(AckRequest { id, mode });
        self
    }

    /// Application-level event name, if this packet carries one.
    ///
    /// Payload-only packets report `"message"` / `"json"`.
    pub fn event_name(&self) -> Option<&str> {
        match &self.kind {
            PacketKind::Event { name, .. } => Some(name),
            PacketKind::Message { .. } => Some("message"),
            PacketKind::Json { .. } => Some("json"),
            _ => None,
        }
    }
}
