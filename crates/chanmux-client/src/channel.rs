//! Application-facing channel handles.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use chanmux_frame::{AckMode, Endpoint, Packet, Value};
use tracing::debug;

use crate::ack::{AckToken, Continuation};
use crate::error::{ClientError, Result};
use crate::event::{DisconnectReason, Event, EventKey};
use crate::state::{
    deliver_pending, ChannelState, ConnectionState, Delivery, Listener, ListenerId, SharedState,
};

/// One logical stream on the shared connection.
///
/// Handles are cheap to clone and hold only a weak reference to the
/// connection, so listeners may capture them freely.
#[derive(Clone)]
pub struct Channel {
    endpoint: Endpoint,
    shared: Weak<SharedState>,
}

impl Channel {
    pub(crate) fn new(endpoint: Endpoint, shared: Weak<SharedState>) -> Self {
        Self { endpoint, shared }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Endpoint path as written on the wire (`""` for the default channel).
    pub fn id(&self) -> &str {
        self.endpoint.as_str()
    }

    fn upgrade(&self) -> Result<Rc<SharedState>> {
        self.shared.upgrade().ok_or(ClientError::ConnectionClosed)
    }

    /// Current state; `Disconnected` once the manager is dropped.
    pub fn state(&self) -> ChannelState {
        self.shared
            .upgrade()
            .and_then(|shared| {
                shared
                    .borrow()
                    .channels
                    .get(&self.endpoint)
                    .map(|slot| slot.state)
            })
            .unwrap_or(ChannelState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Register a listener. Listeners for one key run in registration order;
    /// [`EventKey::Any`] listeners run after them.
    ///
    /// The returned id removes just this listener via
    /// [`remove_listener`](Self::remove_listener).
    pub fn on<F>(&self, key: impl Into<EventKey>, listener: F) -> ListenerId
    where
        F: FnMut(&Event) + 'static,
    {
        let Some(shared) = self.shared.upgrade() else {
            return ListenerId(0);
        };
        let listener: Listener = Rc::new(RefCell::new(listener));
        let mut state = shared.borrow_mut();
        let id = state.next_listener_id();
        if let Some(slot) = state.channels.get_mut(&self.endpoint) {
            slot.listeners.entry(key.into()).or_default().push((id, listener));
        }
        id
    }

    /// Remove one listener. Returns `false` if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut state = shared.borrow_mut();
        state
            .channels
            .get_mut(&self.endpoint)
            .is_some_and(|slot| slot.remove_listener(id))
    }

    /// Remove every listener for `key`. Returns how many were removed.
    pub fn off(&self, key: impl Into<EventKey>) -> usize {
        let Some(shared) = self.shared.upgrade() else {
            return 0;
        };
        let mut state = shared.borrow_mut();
        state
            .channels
            .get_mut(&self.endpoint)
            .and_then(|slot| slot.listeners.remove(&key.into()))
            .map_or(0, |removed| removed.len())
    }

    pub fn listener_count(&self, key: impl Into<EventKey>) -> usize {
        let Some(shared) = self.shared.upgrade() else {
            return 0;
        };
        let state = shared.borrow();
        state
            .channels
            .get(&self.endpoint)
            .and_then(|slot| slot.listeners.get(&key.into()))
            .map_or(0, Vec::len)
    }

    /// Emit a named event without asking for an ack.
    pub fn emit(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let packet = Packet::event(self.endpoint.clone(), name, args);
        self.transmit(packet, None).map(|_| ())
    }

    /// Emit a named event and get a token that completes with the reply.
    pub fn emit_with_ack(&self, name: &str, args: Vec<Value>) -> Result<AckToken> {
        let packet = Packet::event(self.endpoint.clone(), name, args);
        self.transmit_for_token(packet)
    }

    /// Emit a named event and run `callback` with the reply arguments.
    ///
    /// The callback runs at most once, in order with other deliveries, and
    /// never runs if the ack is purged.
    pub fn emit_then<F>(&self, name: &str, args: Vec<Value>, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        let packet = Packet::event(self.endpoint.clone(), name, args);
        self.transmit_with_callback(packet, callback)
    }

    /// Send a plain text message.
    pub fn send(&self, text: &str) -> Result<()> {
        self.transmit(Packet::message(self.endpoint.clone(), text), None)
            .map(|_| ())
    }

    pub fn send_with_ack(&self, text: &str) -> Result<AckToken> {
        self.transmit_for_token(Packet::message(self.endpoint.clone(), text))
    }

    /// Send a text message and run `callback` with the reply arguments.
    pub fn send_then<F>(&self, text: &str, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        self.transmit_with_callback(Packet::message(self.endpoint.clone(), text), callback)
    }

    /// Send a JSON payload.
    pub fn send_json(&self, data: Value) -> Result<()> {
        self.transmit(Packet::json(self.endpoint.clone(), data), None)
            .map(|_| ())
    }

    pub fn send_json_with_ack(&self, data: Value) -> Result<AckToken> {
        self.transmit_for_token(Packet::json(self.endpoint.clone(), data))
    }

    pub fn send_json_then<F>(&self, data: Value, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        self.transmit_with_callback(Packet::json(self.endpoint.clone(), data), callback)
    }

    fn transmit_for_token(&self, packet: Packet) -> Result<AckToken> {
        let mut token = None;
        self.transmit(
            packet,
            Some(&mut |ack_id| {
                let (continuation, t) = Continuation::token(ack_id);
                token = Some(t);
                continuation
            }),
        )?;
        token.ok_or(ClientError::ConnectionClosed)
    }

    fn transmit_with_callback<F>(&self, packet: Packet, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        let shared = self.upgrade()?;
        let mailbox = Rc::clone(&shared.borrow().mailbox);
        let mut callback = Some(callback);
        self.transmit(
            packet,
            Some(&mut |_| {
                let mailbox = Rc::clone(&mailbox);
                let callback = callback.take();
                // Defer to the mailbox so the callback never runs inside
                // the inbound state borrow.
                Continuation::Callback(Box::new(move |args| {
                    if let Some(callback) = callback {
                        mailbox.borrow_mut().push(Delivery::Ack {
                            callback: Box::new(callback),
                            args,
                        });
                    }
                }))
            }),
        )
        .map(|_| ())
    }

    /// Encode and send `packet`, registering an ack continuation if given.
    fn transmit(
        &self,
        packet: Packet,
        continuation: Option<&mut dyn FnMut(u64) -> Continuation>,
    ) -> Result<Option<u64>> {
        let shared = self.upgrade()?;
        let result = {
            let mut state = shared.borrow_mut();
            if state.state == ConnectionState::Closed {
                return Err(ClientError::ConnectionClosed);
            }
            let slot = state
                .channels
                .get_mut(&self.endpoint)
                .filter(|slot| slot.state != ChannelState::Disconnected)
                .ok_or_else(|| ClientError::ChannelDisconnected(self.endpoint.clone()))?;

            let (packet, ack_id) = match continuation {
                Some(make) => {
                    let ack_id = slot.acks.allocate();
                    slot.acks.register(ack_id, make(ack_id));
                    (packet.with_ack(ack_id, AckMode::Data), Some(ack_id))
                }
                None => (packet, None),
            };

            match state.send_packet(packet) {
                Ok(()) => Ok(ack_id),
                Err(err) => {
                    if let Some(ack_id) = ack_id {
                        if let Some(slot) = state.channels.get_mut(&self.endpoint) {
                            slot.acks.discard(ack_id);
                        }
                    }
                    Err(err)
                }
            }
        };
        deliver_pending(&shared);
        result
    }

    /// Leave the channel.
    ///
    /// On the root channel this closes the whole connection. Calling it on
    /// a channel that already left does nothing.
    pub fn disconnect(&self) -> Result<()> {
        let shared = self.upgrade()?;
        {
            let mut state = shared.borrow_mut();
            if self.endpoint.is_root() {
                state.close(DisconnectReason::ClientDisconnect);
            } else {
                let joined = state
                    .channels
                    .get(&self.endpoint)
                    .is_some_and(|slot| slot.state != ChannelState::Disconnected);
                if joined {
                    if state.state == ConnectionState::Open {
                        let _ = state.send_packet(Packet::disconnect(self.endpoint.clone()));
                    }
                    state.leave_channel(&self.endpoint, DisconnectReason::ClientDisconnect);
                }
            }
        }
        deliver_pending(&shared);
        Ok(())
    }

    /// Rejoin a channel that left.
    ///
    /// The root channel can only rejoin through the manager.
    pub fn connect(&self) -> Result<()> {
        let shared = self.upgrade()?;
        let result = {
            let mut state = shared.borrow_mut();
            let Some(slot) = state.channels.get_mut(&self.endpoint) else {
                return Err(ClientError::ChannelDisconnected(self.endpoint.clone()));
            };
            if slot.state != ChannelState::Disconnected {
                return Ok(());
            }
            if self.endpoint.is_root() {
                return Err(ClientError::ConnectionClosed);
            }
            slot.state = ChannelState::Connecting;
            slot.joined = true;
            debug!(endpoint = %self.endpoint, "rejoining channel");
            if state.state == ConnectionState::Open {
                state.send_packet(Packet::connect(self.endpoint.clone()))
            } else {
                Ok(())
            }
        };
        deliver_pending(&shared);
        result
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
