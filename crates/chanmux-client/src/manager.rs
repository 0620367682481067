//! Connection manager: one transport, many channels.
//!
//! The manager never sleeps or spawns. Hosts either call [`poll`] with the
//! current time, or push inbound messages and closures in through
//! [`handle_message`] / [`handle_close`] and call [`tick`] when
//! [`next_deadline`] passes.
//!
//! [`poll`]: ConnectionManager::poll
//! [`handle_message`]: ConnectionManager::handle_message
//! [`handle_close`]: ConnectionManager::handle_close
//! [`tick`]: ConnectionManager::tick
//! [`next_deadline`]: ConnectionManager::next_deadline

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use chanmux_frame::{decode, Endpoint};
use chanmux_transport::{Connector, TransportError};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::dispatcher::route_inbound;
use crate::error::Result;
use crate::event::DisconnectReason;
use crate::state::{deliver_pending, ClientState, ConnectionState, SharedState};

pub struct ConnectionManager {
    shared: Rc<SharedState>,
    connector: Box<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    pub fn with_config(connector: impl Connector + 'static, config: ClientConfig) -> Self {
        Self {
            shared: Rc::new(RefCell::new(ClientState::new(config))),
            connector: Box::new(connector),
        }
    }

    pub fn config(&self) -> ClientConfig {
        self.shared.borrow().config.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.borrow().state
    }

    /// Open the transport.
    ///
    /// Does nothing while already open or reconnecting. On failure the
    /// error is returned; if the reconnect policy allows it, attempts are
    /// scheduled as after a transport loss.
    pub fn connect(&mut self) -> Result<()> {
        self.connect_at(Instant::now())
    }

    pub fn connect_at(&mut self, now: Instant) -> Result<()> {
        {
            let mut state = self.shared.borrow_mut();
            if state.state != ConnectionState::Closed {
                return Ok(());
            }
            state.state = ConnectionState::Connecting;
            state.rejoin_joined();
        }

        let outcome = self.connector.connect();
        let result = {
            let mut state = self.shared.borrow_mut();
            match outcome {
                Ok(transport) => {
                    state.open(transport, None, now);
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, "initial connect failed");
                    if state.config.reconnect.allows(1) {
                        state.state = ConnectionState::Reconnecting;
                        state.schedule_attempt(1, now);
                    } else {
                        state.state = ConnectionState::Closed;
                    }
                    Err(err.into())
                }
            }
        };
        deliver_pending(&self.shared);
        result
    }

    /// Handle for the channel at `path`, created and joined on first use.
    pub fn channel(&self, path: &str) -> Result<Channel> {
        let endpoint = Endpoint::new(path)?;
        self.shared.borrow_mut().ensure_channel(&endpoint);
        deliver_pending(&self.shared);
        Ok(Channel::new(endpoint, Rc::downgrade(&self.shared)))
    }

    /// The default channel. Disconnecting it closes the connection.
    pub fn root(&self) -> Channel {
        Channel::new(Endpoint::root(), Rc::downgrade(&self.shared))
    }

    pub fn channels(&self) -> Vec<Endpoint> {
        self.shared.borrow().channels.keys().cloned().collect()
    }

    /// Outstanding acks across every channel.
    pub fn pending_acks(&self) -> usize {
        self.shared
            .borrow()
            .channels
            .values()
            .map(|slot| slot.acks.pending())
            .sum()
    }

    /// Feed one inbound message from a push-style host.
    pub fn handle_message(&mut self, message: &[u8]) {
        self.handle_message_at(message, Instant::now());
    }

    pub fn handle_message_at(&mut self, message: &[u8], now: Instant) {
        let packet = match decode(message) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, len = message.len(), "dropping malformed frame");
                return;
            }
        };
        {
            let mut state = self.shared.borrow_mut();
            if state.state != ConnectionState::Open {
                debug!(state = state.state.as_str(), "dropping frame received while not open");
                return;
            }
            state.last_inbound = now;
            route_inbound(&self.shared, &mut state, packet, now);
        }
        deliver_pending(&self.shared);
    }

    /// Report that a push-style host saw the transport close.
    pub fn handle_close(&mut self, reason: &str) {
        self.handle_close_at(reason, Instant::now());
    }

    pub fn handle_close_at(&mut self, reason: &str, now: Instant) {
        self.shared
            .borrow_mut()
            .transport_lost(DisconnectReason::TransportClose(reason.to_string()), now);
        deliver_pending(&self.shared);
    }

    /// Read everything the transport has ready, then run timers.
    ///
    /// Returns the number of messages processed.
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut processed = 0;
        loop {
            let received = {
                let mut state = self.shared.borrow_mut();
                match state.transport.as_mut() {
                    Some(transport) => transport.recv(),
                    None => break,
                }
            };
            match received {
                Ok(Some(message)) => {
                    processed += 1;
                    self.handle_message_at(&message, now);
                }
                Ok(None) => break,
                Err(err) => {
                    let detail = match err {
                        TransportError::Closed(reason) => reason,
                        other => other.to_string(),
                    };
                    self.handle_close_at(&detail, now);
                    break;
                }
            }
        }
        self.tick(now);
        processed
    }

    /// Run heartbeat and reconnect timers.
    pub fn tick(&mut self, now: Instant) {
        let attempt = {
            let mut state = self.shared.borrow_mut();
            if state.state == ConnectionState::Open {
                if let Some(timeout) = state.config.heartbeat_timeout() {
                    if now.saturating_duration_since(state.last_inbound) >= timeout {
                        state.transport_lost(DisconnectReason::HeartbeatTimeout, now);
                    }
                }
            }
            match &state.reconnect {
                Some(schedule) if state.state == ConnectionState::Reconnecting && schedule.due <= now => {
                    Some(schedule.attempt)
                }
                _ => None,
            }
        };

        if let Some(attempt) = attempt {
            info!(attempt, "reconnect attempt");
            let outcome = self.connector.connect();
            let mut state = self.shared.borrow_mut();
            match outcome {
                Ok(transport) => state.open(transport, Some(attempt), now),
                Err(err) => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    let next = attempt + 1;
                    if state.config.reconnect.allows(next) {
                        state.schedule_attempt(next, now);
                    } else {
                        state.give_up(attempt);
                    }
                }
            }
        }
        deliver_pending(&self.shared);
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let state = self.shared.borrow();
        match state.state {
            ConnectionState::Reconnecting => state.reconnect.as_ref().map(|s| s.due),
            ConnectionState::Open => state
                .config
                .heartbeat_timeout()
                .map(|timeout| state.last_inbound + timeout),
            ConnectionState::Connecting | ConnectionState::Closed => None,
        }
    }

    /// Close the connection. Every joined channel sees one disconnect.
    ///
    /// A later [`connect`](Self::connect) rejoins the channels the
    /// application has not left itself.
    pub fn close(&mut self) {
        self.shared
            .borrow_mut()
            .close(DisconnectReason::ClientDisconnect);
        deliver_pending(&self.shared);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.try_borrow_mut() {
            if let Some(mut transport) = state.transport.take() {
                transport.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chanmux_transport::MemoryConnector;

    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::state::ChannelState;
    use crate::event::{Event, SystemKind};

    fn manager_with(config: ClientConfig) -> (ConnectionManager, MemoryConnector) {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::with_config(connector.clone(), config);
        (manager, connector)
    }

    #[test]
    fn connect_opens_transport_and_awaits_root_connect() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        assert_eq!(manager.state(), ConnectionState::Closed);

        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.root().state(), ChannelState::Connecting);

        let remote = connector.latest().unwrap();
        remote.push("1::");
        manager.poll(Instant::now());
        assert_eq!(manager.root().state(), ChannelState::Connected);
    }

    #[test]
    fn heartbeat_is_answered() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        let remote = connector.latest().unwrap();

        remote.push("2::");
        manager.poll(Instant::now());
        assert_eq!(remote.take_sent_text(), vec!["2::".to_string()]);
    }

    #[test]
    fn named_channel_sends_connect_frame() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        let remote = connector.latest().unwrap();

        let chat = manager.channel("/chat").unwrap();
        assert_eq!(chat.state(), ChannelState::Connecting);
        assert_eq!(remote.take_sent_text(), vec!["1::/chat".to_string()]);

        manager.channel("/chat").unwrap();
        assert!(remote.take_sent_text().is_empty());
    }

    #[test]
    fn invalid_channel_path_is_rejected() {
        let (manager, _connector) = manager_with(ClientConfig::default());
        assert!(manager.channel("chat").is_err());
    }

    #[test]
    fn failed_initial_connect_without_reconnect_closes() {
        let config = ClientConfig {
            reconnect: ReconnectPolicy::disabled(),
            ..ClientConfig::default()
        };
        let (mut manager, connector) = manager_with(config);
        connector.fail_next(1);

        assert!(manager.connect().is_err());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.next_deadline(), None);
    }

    #[test]
    fn failed_initial_connect_schedules_retry() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        connector.fail_next(1);
        let start = Instant::now();

        assert!(manager.connect_at(start).is_err());
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(
            manager.next_deadline(),
            Some(start + Duration::from_millis(500))
        );

        manager.tick(start + Duration::from_millis(500));
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(connector.attempts(), 2);
    }

    #[test]
    fn heartbeat_timeout_counts_as_transport_loss() {
        let config = ClientConfig {
            heartbeat_timeout_ms: Some(1_000),
            ..ClientConfig::default()
        };
        let (mut manager, connector) = manager_with(config);
        let start = Instant::now();
        manager.connect_at(start).unwrap();
        let remote = connector.latest().unwrap();
        remote.push("1::");
        manager.poll(start);

        let reasons = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reasons);
        manager.root().on(SystemKind::Disconnect, move |event: &Event| {
            sink.borrow_mut().push(format!("{:?}", event.system()));
        });

        assert_eq!(manager.next_deadline(), Some(start + Duration::from_secs(1)));
        manager.tick(start + Duration::from_millis(999));
        assert_eq!(manager.state(), ConnectionState::Open);

        manager.tick(start + Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(reasons.borrow().len(), 1);
        assert!(reasons.borrow()[0].contains("HeartbeatTimeout"));
        assert!(remote.closed().is_some());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        let remote = connector.latest().unwrap();

        remote.push("garbage");
        remote.push("1::");
        assert_eq!(manager.poll(Instant::now()), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.root().is_connected());
    }

    #[test]
    fn close_sends_root_disconnect() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        let remote = connector.latest().unwrap();

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(remote.take_sent_text(), vec!["0::".to_string()]);
        assert_eq!(remote.closed().as_deref(), Some("closed by client"));
        assert_eq!(manager.next_deadline(), None);
    }

    #[test]
    fn reconnect_after_close_rejoins_root() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        manager.close();

        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.root().state(), ChannelState::Connecting);
        assert_eq!(connector.connections(), 2);
    }

    #[test]
    fn reconnect_after_close_rejoins_channels_not_left() {
        let (mut manager, connector) = manager_with(ClientConfig::default());
        manager.connect().unwrap();
        let chat = manager.channel("/chat").unwrap();
        let news = manager.channel("/news").unwrap();
        news.disconnect().unwrap();
        manager.close();
        assert_eq!(chat.state(), ChannelState::Disconnected);

        manager.connect().unwrap();
        let remote = connector.latest().unwrap();
        assert_eq!(remote.take_sent_text(), vec!["1::/chat".to_string()]);
        assert_eq!(chat.state(), ChannelState::Connecting);
        assert_eq!(news.state(), ChannelState::Disconnected);

        news.connect().unwrap();
        assert_eq!(remote.take_sent_text(), vec!["1::/news".to_string()]);
    }
}
