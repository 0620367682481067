//! Signaling vocabulary carried as ordinary channel events.

use chanmux_client::Value;
use serde::Deserialize;

use crate::error::{Result, SessionError};

/// Opaque offer or answer. Which one it is follows from the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor(Value);

impl SessionDescriptor {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for SessionDescriptor {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Event names used for the four signals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SignalNames {
    pub invite: String,
    pub descriptor: String,
    pub candidate: String,
    pub hangup: String,
}

impl Default for SignalNames {
    fn default() -> Self {
        Self::rtc()
    }
}

impl SignalNames {
    /// `rtc_`-prefixed names, as relayed by the reference room server.
    pub fn rtc() -> Self {
        Self {
            invite: "rtc_invite".to_string(),
            descriptor: "rtc_descriptor".to_string(),
            candidate: "rtc_candidate".to_string(),
            hangup: "rtc_hangup".to_string(),
        }
    }

    pub fn plain() -> Self {
        Self {
            invite: "invite".to_string(),
            descriptor: "descriptor".to_string(),
            candidate: "candidate".to_string(),
            hangup: "hangup".to_string(),
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [
            self.invite.as_str(),
            self.descriptor.as_str(),
            self.candidate.as_str(),
            self.hangup.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// `[peer, descriptor?]`
    Invite {
        peer: String,
        descriptor: Option<SessionDescriptor>,
    },
    /// `[descriptor]`
    Descriptor(SessionDescriptor),
    /// `[candidate]`
    Candidate(Value),
    /// `[]`
    Hangup,
}

impl Signal {
    /// Parse a channel event. Returns `Ok(None)` for names outside the
    /// vocabulary.
    pub fn parse(names: &SignalNames, name: &str, args: &[Value]) -> Result<Option<Self>> {
        let signal = if name == names.invite {
            let peer = match args.first() {
                Some(Value::String(peer)) => peer.clone(),
                Some(other) => {
                    return Err(malformed(name, format!("peer must be a string, got {other}")))
                }
                None => return Err(malformed(name, "missing peer".to_string())),
            };
            let descriptor = args
                .get(1)
                .filter(|value| !value.is_null())
                .cloned()
                .map(SessionDescriptor);
            Self::Invite { peer, descriptor }
        } else if name == names.descriptor {
            Self::Descriptor(SessionDescriptor(required(name, args)?))
        } else if name == names.candidate {
            Self::Candidate(required(name, args)?)
        } else if name == names.hangup {
            Self::Hangup
        } else {
            return Ok(None);
        };
        Ok(Some(signal))
    }

    pub fn event_name<'a>(&self, names: &'a SignalNames) -> &'a str {
        match self {
            Self::Invite { .. } => &names.invite,
            Self::Descriptor(_) => &names.descriptor,
            Self::Candidate(_) => &names.candidate,
            Self::Hangup => &names.hangup,
        }
    }

    pub fn to_args(&self) -> Vec<Value> {
        match self {
            Self::Invite { peer, descriptor } => {
                let mut args = vec![Value::String(peer.clone())];
                if let Some(descriptor) = descriptor {
                    args.push(descriptor.0.clone());
                }
                args
            }
            Self::Descriptor(descriptor) => vec![descriptor.0.clone()],
            Self::Candidate(candidate) => vec![candidate.clone()],
            Self::Hangup => Vec::new(),
        }
    }
}

fn required(name: &str, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(malformed(name, "missing payload".to_string())),
    }
}

fn malformed(signal: &str, detail: String) -> SessionError {
    SessionError::MalformedSignal {
        signal: signal.to_string(),
        detail,
    }
}
