//! Per-channel table of outstanding acknowledgments.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chanmux_frame::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::ClientError;

/// What runs when the remote answers an ack request.
pub enum Continuation {
    /// Completes an [`AckToken`].
    Token(oneshot::Sender<Vec<Value>>),
    Callback(Box<dyn FnOnce(Vec<Value>)>),
}

impl Continuation {
    /// A token continuation and the token it completes.
    pub fn token(ack_id: u64) -> (Self, AckToken) {
        let (tx, rx) = oneshot::channel();
        (Self::Token(tx), AckToken::new(ack_id, rx))
    }

    fn complete(self, args: Vec<Value>) {
        match self {
            // The receiver may be gone; the reply is still consumed.
            Self::Token(tx) => {
                let _ = tx.send(args);
            }
            Self::Callback(callback) => callback(args),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Continuation::Token"),
            Self::Callback(_) => f.write_str("Continuation::Callback"),
        }
    }
}

/// Outstanding acks for one channel.
///
/// Ids are positive and increase monotonically until [`purge`](Self::purge),
/// which drops every continuation uninvoked and starts over at 1.
#[derive(Debug)]
pub struct AckRegistry {
    next_id: u64,
    pending: HashMap<u64, Continuation>,
}

impl Default for AckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AckRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Reserve the next ack id.
    pub fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, ack_id: u64, continuation: Continuation) {
        self.pending.insert(ack_id, continuation);
    }

    /// Invoke and remove the continuation for `ack_id`.
    ///
    /// Returns `false` for unknown or already-resolved ids.
    pub fn resolve(&mut self, ack_id: u64, args: Vec<Value>) -> bool {
        match self.pending.remove(&ack_id) {
            Some(continuation) => {
                continuation.complete(args);
                true
            }
            None => false,
        }
    }

    /// Remove a registration without invoking it.
    pub fn discard(&mut self, ack_id: u64) -> bool {
        self.pending.remove(&ack_id).is_some()
    }

    /// Drop every pending continuation and reset the id counter.
    ///
    /// Returns how many continuations were dropped.
    pub fn purge(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.next_id = 1;
        dropped
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, ack_id: u64) -> bool {
        self.pending.contains_key(&ack_id)
    }
}

/// Result of checking an [`AckToken`] without blocking.
#[derive(Debug, Clone, PartialEq)]
pub enum AckStatus {
    Pending,
    Resolved(Vec<Value>),
    /// The ack was discarded (channel disconnect or transport loss).
    Dropped,
    /// The reply was already taken from this token.
    Consumed,
}

/// Completion handle for an emit that requested an ack.
///
/// Poll it with [`try_take`](Self::try_take) from a sans-IO loop, or
/// `.await` it from async code.
#[derive(Debug)]
pub struct AckToken {
    ack_id: u64,
    rx: oneshot::Receiver<Vec<Value>>,
    consumed: bool,
}

impl AckToken {
    fn new(ack_id: u64, rx: oneshot::Receiver<Vec<Value>>) -> Self {
        Self {
            ack_id,
            rx,
            consumed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.ack_id
    }

    pub fn try_take(&mut self) -> AckStatus {
        if self.consumed {
            return AckStatus::Consumed;
        }
        match self.rx.try_recv() {
            Ok(args) => {
                self.consumed = true;
                AckStatus::Resolved(args)
            }
            Err(TryRecvError::Empty) => AckStatus::Pending,
            Err(TryRecvError::Closed) => {
                self.consumed = true;
                AckStatus::Dropped
            }
        }
    }
}

impl Future for AckToken {
    type Output = Result<Vec<Value>, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ack_id = self.ack_id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| ClientError::AckDropped(ack_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut registry = AckRegistry::new();
        assert_eq!(registry.allocate(), 1);
        assert_eq!(registry.allocate(), 2);
        assert_eq!(registry.allocate(), 3);
    }

    #[test]
    fn resolve_runs_continuation_once() {
        let mut registry = AckRegistry::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let id = registry.allocate();
        let sink = Rc::clone(&hits);
        registry.register(
            id,
            Continuation::Callback(Box::new(move |args| sink.borrow_mut().push(args))),
        );

        assert!(registry.resolve(id, vec![json!("ok")]));
        assert!(!registry.resolve(id, vec![json!("again")]));
        assert_eq!(*hits.borrow(), vec![vec![json!("ok")]]);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn unknown_id_is_not_resolved() {
        let mut registry = AckRegistry::new();
        assert!(!registry.resolve(42, Vec::new()));
    }

    #[test]
    fn token_sees_reply() {
        let mut registry = AckRegistry::new();
        let id = registry.allocate();
        let (continuation, mut token) = Continuation::token(id);
        registry.register(id, continuation);

        assert_eq!(token.id(), 1);
        assert_eq!(token.try_take(), AckStatus::Pending);
        assert!(registry.resolve(id, vec![json!(1), json!(2)]));
        assert_eq!(token.try_take(), AckStatus::Resolved(vec![json!(1), json!(2)]));
        assert_eq!(token.try_take(), AckStatus::Consumed);
    }

    #[test]
    fn purge_drops_continuations_and_resets_ids() {
        let mut registry = AckRegistry::new();
        let invoked = Rc::new(RefCell::new(false));

        let first = registry.allocate();
        let (continuation, mut token) = Continuation::token(first);
        registry.register(first, continuation);

        let second = registry.allocate();
        let flag = Rc::clone(&invoked);
        registry.register(
            second,
            Continuation::Callback(Box::new(move |_| *flag.borrow_mut() = true)),
        );

        assert_eq!(registry.purge(), 2);
        assert_eq!(token.try_take(), AckStatus::Dropped);
        assert!(!registry.resolve(second, Vec::new()));
        assert!(!*invoked.borrow());
        assert_eq!(registry.allocate(), 1);
    }

    #[test]
    fn discard_skips_invocation() {
        let mut registry = AckRegistry::new();
        let id = registry.allocate();
        let (continuation, mut token) = Continuation::token(id);
        registry.register(id, continuation);

        assert!(registry.discard(id));
        assert!(!registry.is_pending(id));
        assert_eq!(token.try_take(), AckStatus::Dropped);
    }

    #[tokio::test]
    async fn token_can_be_awaited() {
        let mut registry = AckRegistry::new();
        let id = registry.allocate();
        let (continuation, token) = Continuation::token(id);
        registry.register(id, continuation);
        registry.resolve(id, vec![json!("done")]);

        assert_eq!(token.await.unwrap(), vec![json!("done")]);
    }

    #[tokio::test]
    async fn awaiting_purged_token_fails() {
        let mut registry = AckRegistry::new();
        let id = registry.allocate();
        let (continuation, token) = Continuation::token(id);
        registry.register(id, continuation);
        registry.purge();

        assert!(matches!(token.await, Err(ClientError::AckDropped(1))));
    }
}
