//! In-process transport pairs.
//!
//! Both halves share one single-threaded link, so a test (or a demo) can
//! play the remote side of a connection without sockets or threads.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Transport};

#[derive(Debug, Default)]
struct Link {
    inbound: VecDeque<Bytes>,
    outbound: VecDeque<Bytes>,
    closed: Option<String>,
}

/// Client half of an in-memory link.
#[derive(Debug)]
pub struct MemoryTransport {
    link: Rc<RefCell<Link>>,
}

/// Remote half of an in-memory link.
#[derive(Debug, Clone)]
pub struct RemoteEnd {
    link: Rc<RefCell<Link>>,
}

impl MemoryTransport {
    /// Create a connected pair.
    pub fn pair() -> (MemoryTransport, RemoteEnd) {
        let link = Rc::new(RefCell::new(Link::default()));
        (
            MemoryTransport {
                link: Rc::clone(&link),
            },
            RemoteEnd { link },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        let mut link = self.link.borrow_mut();
        if let Some(reason) = &link.closed {
            return Err(TransportError::Closed(reason.clone()));
        }
        link.outbound.push_back(Bytes::copy_from_slice(message));
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Bytes>> {
        let mut link = self.link.borrow_mut();
        if let Some(message) = link.inbound.pop_front() {
            return Ok(Some(message));
        }
        match &link.closed {
            Some(reason) => Err(TransportError::Closed(reason.clone())),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        let mut link = self.link.borrow_mut();
        if link.closed.is_none() {
            link.closed = Some("closed by client".to_string());
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl RemoteEnd {
    /// Queue a message for the client to receive.
    pub fn push(&self, message: impl AsRef<[u8]>) {
        self.link
            .borrow_mut()
            .inbound
            .push_back(Bytes::copy_from_slice(message.as_ref()));
    }

    /// Drain everything the client has sent so far.
    pub fn take_sent(&self) -> Vec<Bytes> {
        self.link.borrow_mut().outbound.drain(..).collect()
    }

    /// Drain everything the client has sent so far, as UTF-8 text.
    pub fn take_sent_text(&self) -> Vec<String> {
        self.take_sent()
            .iter()
            .map(|msg| String::from_utf8_lossy(msg).into_owned())
            .collect()
    }

    /// Drop the link from the remote side.
    pub fn sever(&self, reason: &str) {
        let mut link = self.link.borrow_mut();
        if link.closed.is_none() {
            link.closed = Some(reason.to_string());
        }
    }

    /// Returns the close reason, if either side closed the link.
    pub fn closed(&self) -> Option<String> {
        self.link.borrow().closed.clone()
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    remotes: Vec<RemoteEnd>,
    attempts: usize,
    fail_next: usize,
}

/// Connector that hands out fresh in-memory pairs.
///
/// Clones share state, so a test keeps one clone to inspect the remote
/// ends the manager's clone produced.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Rc<RefCell<ConnectorState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.state.borrow_mut().fail_next = count;
    }

    /// Number of connect attempts made, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.borrow().attempts
    }

    /// Number of transports handed out.
    pub fn connections(&self) -> usize {
        self.state.borrow().remotes.len()
    }

    /// Remote end of the most recent successful connection.
    pub fn latest(&self) -> Option<RemoteEnd> {
        self.state.borrow().remotes.last().cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Refused(format!(
                "memory connect attempt {} refused",
                state.attempts
            )));
        }
        let (transport, remote) = MemoryTransport::pair();
        state.remotes.push(remote);
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_flow_both_ways() {
        let (mut client, remote) = MemoryTransport::pair();
        client.send(b"1::/chat").unwrap();
        remote.push("1::/chat");

        assert_eq!(remote.take_sent_text(), vec!["1::/chat".to_string()]);
        assert_eq!(client.recv().unwrap().unwrap().as_ref(), b"1::/chat");
        assert!(client.recv().unwrap().is_none());
    }

    #[test]
    fn pending_messages_drain_before_close() {
        let (mut client, remote) = MemoryTransport::pair();
        remote.push("3:::last words");
        remote.sever("server went away");

        assert_eq!(client.recv().unwrap().unwrap().as_ref(), b"3:::last words");
        let err = client.recv().unwrap_err();
        assert!(matches!(err, TransportError::Closed(reason) if reason == "server went away"));
    }

    #[test]
    fn send_after_sever_fails() {
        let (mut client, remote) = MemoryTransport::pair();
        remote.sever("gone");
        assert!(client.send(b"2::").unwrap_err().is_closed());
    }

    #[test]
    fn client_close_visible_to_remote() {
        let (mut client, remote) = MemoryTransport::pair();
        client.close();
        assert_eq!(remote.closed().as_deref(), Some("closed by client"));
    }

    #[test]
    fn connector_counts_and_fails_on_request() {
        let observed = MemoryConnector::new();
        let mut connector = observed.clone();
        observed.fail_next(2);

        assert!(connector.connect().is_err());
        assert!(connector.connect().is_err());
        assert!(connector.connect().is_ok());
        assert_eq!(observed.attempts(), 3);
        assert_eq!(observed.connections(), 1);
        assert!(observed.latest().is_some());
    }
}
