//! Connection state shared by the manager and its channel handles.
//!
//! Everything lives behind one `Rc<RefCell<_>>`. Listeners never run while
//! that borrow is held: state changes push deliveries into a [`Mailbox`],
//! and [`deliver_pending`] drains it afterwards. A listener that emits,
//! disconnects, or responds only queues more deliveries, which the outer
//! drain loop picks up in order.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use chanmux_frame::{encode, Endpoint, Packet, Value};
use chanmux_transport::Transport;
use tracing::{debug, info, warn};

use crate::ack::AckRegistry;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::{DisconnectReason, ErrorEvent, Event, EventKey, SystemEvent};

pub(crate) type SharedState = RefCell<ClientState>;
pub(crate) type Listener = Rc<RefCell<dyn FnMut(&Event)>>;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Join requested, waiting for the remote connect frame.
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Handle to one registered listener, for removing it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub(crate) struct ChannelSlot {
    pub state: ChannelState,
    /// The application wants this channel; cleared only by leaving it.
    /// A fresh `connect` rejoins every joined channel.
    pub joined: bool,
    pub listeners: HashMap<EventKey, Vec<(ListenerId, Listener)>>,
    pub acks: AckRegistry,
}

impl ChannelSlot {
    fn new() -> Self {
        Self {
            state: ChannelState::Connecting,
            joined: true,
            listeners: HashMap::new(),
            acks: AckRegistry::new(),
        }
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        for entries in self.listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(entry, _)| *entry == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }
}

pub(crate) enum Delivery {
    Event { endpoint: Endpoint, event: Event },
    Ack {
        callback: Box<dyn FnOnce(Vec<Value>)>,
        args: Vec<Value>,
    },
}

#[derive(Default)]
pub(crate) struct Mailbox {
    queue: VecDeque<Delivery>,
    delivering: bool,
}

impl Mailbox {
    pub fn push(&mut self, delivery: Delivery) {
        self.queue.push_back(delivery);
    }
}

pub(crate) struct ReconnectSchedule {
    pub attempt: u32,
    pub due: Instant,
}

pub(crate) struct ClientState {
    pub config: ClientConfig,
    pub state: ConnectionState,
    pub transport: Option<Box<dyn Transport>>,
    pub channels: BTreeMap<Endpoint, ChannelSlot>,
    pub outbound: VecDeque<Packet>,
    /// Bumped every time a transport opens.
    pub epoch: u64,
    pub reconnect: Option<ReconnectSchedule>,
    pub last_inbound: Instant,
    pub mailbox: Rc<RefCell<Mailbox>>,
    next_listener: u64,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(Endpoint::root(), ChannelSlot::new());
        Self {
            config,
            state: ConnectionState::Closed,
            transport: None,
            channels,
            outbound: VecDeque::new(),
            epoch: 0,
            reconnect: None,
            last_inbound: Instant::now(),
            mailbox: Rc::new(RefCell::new(Mailbox::default())),
            next_listener: 0,
        }
    }

    pub fn next_listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    /// Before a fresh connect: every channel the application has not left
    /// waits to join again.
    pub fn rejoin_joined(&mut self) {
        for slot in self.channels.values_mut() {
            if slot.joined && slot.state == ChannelState::Disconnected {
                slot.state = ChannelState::Connecting;
            }
        }
    }

    pub fn push_event(&self, endpoint: &Endpoint, event: Event) {
        self.mailbox.borrow_mut().push(Delivery::Event {
            endpoint: endpoint.clone(),
            event,
        });
    }

    /// Queue a system event for every channel that has not left.
    pub fn broadcast(&self, event: SystemEvent) {
        for (endpoint, slot) in &self.channels {
            if slot.state != ChannelState::Disconnected {
                self.push_event(endpoint, Event::System(event.clone()));
            }
        }
    }

    /// Send a packet, or hold it until the next transport opens.
    pub fn send_packet(&mut self, packet: Packet) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(ClientError::ConnectionClosed),
            ConnectionState::Open => self.write_now(&packet),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                let limit = self.config.max_buffered_packets;
                if self.outbound.len() >= limit {
                    return Err(ClientError::BufferFull(limit));
                }
                debug!(endpoint = %packet.endpoint, kind = packet.kind.type_name(), "buffering packet until transport opens");
                self.outbound.push_back(packet);
                Ok(())
            }
        }
    }

    fn write_now(&mut self, packet: &Packet) -> Result<()> {
        let bytes = encode(packet)?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(ClientError::ConnectionClosed);
        };
        match transport.send(&bytes) {
            Ok(()) => {
                debug!(endpoint = %packet.endpoint, kind = packet.kind.type_name(), len = bytes.len(), "sent packet");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "send failed");
                let reason = DisconnectReason::TransportClose(err.to_string());
                self.transport_lost(reason, Instant::now());
                Err(err.into())
            }
        }
    }

    /// Install a fresh transport.
    ///
    /// `reconnected` carries the attempt count when this follows a loss.
    pub fn open(&mut self, transport: Box<dyn Transport>, reconnected: Option<u32>, now: Instant) {
        info!(transport = transport.name(), reconnected = ?reconnected, "transport open");
        self.transport = Some(transport);
        self.state = ConnectionState::Open;
        self.epoch += 1;
        self.reconnect = None;
        self.last_inbound = now;

        if let Some(attempts) = reconnected {
            self.broadcast(SystemEvent::Reconnect { attempts });
        }

        let joins: Vec<Endpoint> = self
            .channels
            .iter()
            .filter(|(endpoint, slot)| !endpoint.is_root() && slot.state == ChannelState::Connecting)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        for endpoint in joins {
            if self.write_now(&Packet::connect(endpoint)).is_err() {
                return;
            }
        }
        while let Some(packet) = self.outbound.pop_front() {
            if self.write_now(&packet).is_err() {
                return;
            }
        }
    }

    /// Drop every pending ack on every channel.
    fn purge_acks(&mut self) {
        for (endpoint, slot) in self.channels.iter_mut() {
            let dropped = slot.acks.purge();
            if dropped > 0 {
                debug!(endpoint = %endpoint, dropped, "purged pending acks");
            }
        }
    }

    fn take_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// The transport is gone without anyone asking for it.
    ///
    /// Channels that were joined drop back to connecting so they rejoin
    /// after the next successful reconnect.
    pub fn transport_lost(&mut self, reason: DisconnectReason, now: Instant) {
        if matches!(self.state, ConnectionState::Closed | ConnectionState::Reconnecting) {
            return;
        }
        warn!(reason = %reason, "transport lost");
        self.take_transport();
        self.purge_acks();
        self.outbound.clear();

        for (endpoint, slot) in self.channels.iter_mut() {
            match slot.state {
                ChannelState::Connected => {
                    slot.state = ChannelState::Connecting;
                    self.mailbox.borrow_mut().push(Delivery::Event {
                        endpoint: endpoint.clone(),
                        event: Event::System(SystemEvent::Disconnect {
                            reason: reason.clone(),
                        }),
                    });
                }
                ChannelState::Connecting | ChannelState::Disconnected => {}
            }
        }

        if self.config.reconnect.allows(1) {
            self.state = ConnectionState::Reconnecting;
            self.schedule_attempt(1, now);
        } else {
            info!("reconnect disabled, closing");
            self.state = ConnectionState::Closed;
            self.settle_channels();
        }
    }

    pub fn schedule_attempt(&mut self, attempt: u32, now: Instant) {
        let delay = self.config.reconnect.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.reconnect = Some(ReconnectSchedule {
            attempt,
            due: now + delay,
        });
        self.broadcast(SystemEvent::Reconnecting { attempt, delay });
    }

    /// Every attempt failed.
    pub fn give_up(&mut self, attempts: u32) {
        warn!(attempts, "giving up on reconnect");
        self.reconnect = None;
        self.state = ConnectionState::Closed;
        self.broadcast(SystemEvent::Error(ErrorEvent::ReconnectFailed { attempts }));
        self.settle_channels();
    }

    /// Closed until the next explicit `connect`.
    fn settle_channels(&mut self) {
        for slot in self.channels.values_mut() {
            slot.state = ChannelState::Disconnected;
        }
    }

    /// Deliberate close, from either side. No reconnect follows.
    pub fn close(&mut self, reason: DisconnectReason) {
        if self.state == ConnectionState::Closed && self.transport.is_none() {
            let mut changed = false;
            for slot in self.channels.values_mut() {
                changed |= slot.state != ChannelState::Disconnected;
            }
            if !changed {
                return;
            }
        }
        info!(reason = %reason, "closing connection");
        if reason == DisconnectReason::ClientDisconnect && self.state == ConnectionState::Open {
            let _ = self.write_now(&Packet::disconnect(Endpoint::root()));
        }
        self.take_transport();
        self.purge_acks();
        self.outbound.clear();
        self.reconnect = None;
        self.state = ConnectionState::Closed;

        for (endpoint, slot) in self.channels.iter_mut() {
            if slot.state != ChannelState::Disconnected {
                slot.state = ChannelState::Disconnected;
                self.mailbox.borrow_mut().push(Delivery::Event {
                    endpoint: endpoint.clone(),
                    event: Event::System(SystemEvent::Disconnect {
                        reason: reason.clone(),
                    }),
                });
            }
        }
    }

    /// Get or create the slot for `endpoint`, joining it when possible.
    pub fn ensure_channel(&mut self, endpoint: &Endpoint) {
        if self.channels.contains_key(endpoint) {
            return;
        }
        debug!(endpoint = %endpoint, "creating channel");
        self.channels.insert(endpoint.clone(), ChannelSlot::new());
        if self.state == ConnectionState::Open && !endpoint.is_root() {
            let _ = self.write_now(&Packet::connect(endpoint.clone()));
        }
    }

    /// Leave one channel. Returns `false` when it had already left.
    pub fn leave_channel(&mut self, endpoint: &Endpoint, reason: DisconnectReason) -> bool {
        let Some(slot) = self.channels.get_mut(endpoint) else {
            return false;
        };
        if slot.state == ChannelState::Disconnected {
            return false;
        }
        slot.state = ChannelState::Disconnected;
        slot.joined = false;
        let dropped = slot.acks.purge();
        debug!(endpoint = %endpoint, reason = %reason, dropped, "channel disconnected");
        self.push_event(endpoint, Event::System(SystemEvent::Disconnect { reason }));
        true
    }
}

/// Run every queued delivery, in order.
///
/// Re-entrant calls return immediately; the outermost call keeps draining
/// until the queue is empty.
pub(crate) fn deliver_pending(shared: &Rc<SharedState>) {
    let mailbox = Rc::clone(&shared.borrow().mailbox);
    {
        let mut mb = mailbox.borrow_mut();
        if mb.delivering {
            return;
        }
        mb.delivering = true;
    }
    let _guard = DeliveringGuard(&mailbox);

    loop {
        let next = mailbox.borrow_mut().queue.pop_front();
        let Some(delivery) = next else { break };
        match delivery {
            Delivery::Ack { callback, args } => callback(args),
            Delivery::Event { endpoint, event } => {
                let listeners = listeners_for(shared, &endpoint, &event);
                for listener in listeners {
                    (&mut *listener.borrow_mut())(&event);
                }
            }
        }
    }
}

fn listeners_for(shared: &Rc<SharedState>, endpoint: &Endpoint, event: &Event) -> Vec<Listener> {
    let state = shared.borrow();
    let Some(slot) = state.channels.get(endpoint) else {
        return Vec::new();
    };
    // A listener earlier in this drain may have left the channel.
    if !matches!(event, Event::System(_)) && slot.state != ChannelState::Connected {
        debug!(endpoint = %endpoint, key = %event.key(), "dropping delivery for inactive channel");
        return Vec::new();
    }
    let key = event.key();
    slot.listeners
        .get(&key)
        .into_iter()
        .chain(slot.listeners.get(&EventKey::Any))
        .flatten()
        .map(|(_, listener)| Rc::clone(listener))
        .collect()
}

struct DeliveringGuard<'a>(&'a Rc<RefCell<Mailbox>>);

impl Drop for DeliveringGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().delivering = false;
    }
}
