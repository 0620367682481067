//! Peer-session state machine.
//!
//! ```text
//! idle --invite--> inviting --answer--> negotiating --media+remote--> active --hangup--> ended
//! idle <--reset-- ended
//! idle --recv invite--> invited --accept--> negotiating --> active --hangup--> ended
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use chanmux_client::{Channel, Event, ListenerId, SystemKind, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::media::{MediaCapability, MediaHandle};
use crate::signal::{SessionDescriptor, Signal, SignalNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Invite sent, waiting for the answer.
    Inviting,
    /// Invite received, waiting for the application to accept.
    Invited,
    Negotiating,
    Active,
    Ended,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Inviting => "inviting",
            Self::Invited => "invited",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    /// Whether a session is underway (neither idle nor ended).
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Idle | Self::Ended)
    }

    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Inviting)
                | (Idle, Invited)
                | (Inviting, Negotiating)
                | (Invited, Negotiating)
                | (Negotiating, Active)
                | (Inviting | Invited | Negotiating | Active, Ended)
                | (Ended, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Observer = Rc<RefCell<dyn FnMut(SessionState, SessionState)>>;
type SharedMedia = Rc<RefCell<dyn MediaCapability>>;

/// Work a state change leaves behind, run once no session state is borrowed.
enum Effect {
    Changed(SessionState, SessionState),
    Render(MediaHandle),
    Release(MediaHandle),
}

type Effects = Vec<Effect>;

/// Channel listeners owned by one session; removed when it goes away.
struct Attachment {
    channel: Channel,
    ids: Vec<ListenerId>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.channel.remove_listener(id);
        }
    }
}

struct SessionCore {
    state: SessionState,
    peer: Option<String>,
    local_descriptor: Option<SessionDescriptor>,
    remote_descriptor: Option<SessionDescriptor>,
    local_media: Option<MediaHandle>,
    remote_media: Option<MediaHandle>,
    candidates: Vec<Value>,
    media: SharedMedia,
    observers: Vec<Observer>,
    pending: VecDeque<Effect>,
    draining: bool,
    attachment: Option<Attachment>,
}

impl SessionCore {
    fn transition(&mut self, to: SessionState, effects: &mut Effects) -> bool {
        let from = self.state;
        if !from.can_transition(to) {
            warn!(from = from.as_str(), to = to.as_str(), "invalid session transition ignored");
            return false;
        }
        info!(from = from.as_str(), to = to.as_str(), peer = ?self.peer, "session state change");
        self.state = to;
        effects.push(Effect::Changed(from, to));
        true
    }

    /// Move on to `active` once both local media and the remote descriptor
    /// are in place.
    fn try_activate(&mut self, effects: &mut Effects) {
        if self.state != SessionState::Negotiating
            || self.local_media.is_none()
            || self.remote_descriptor.is_none()
        {
            return;
        }
        if self.transition(SessionState::Active, effects) {
            let remote = MediaHandle::remote(self.peer.as_deref().unwrap_or("peer"));
            effects.push(Effect::Render(remote.clone()));
            self.remote_media = Some(remote);
        }
    }

    fn end(&mut self, effects: &mut Effects) {
        if self.transition(SessionState::Ended, effects) {
            self.release(effects);
        }
    }

    fn release(&mut self, effects: &mut Effects) {
        if let Some(local) = self.local_media.take() {
            effects.push(Effect::Release(local));
        }
        self.remote_media = None;
    }

    fn receive(&mut self, signal: Signal, effects: &mut Effects) {
        let state = self.state;
        match signal {
            Signal::Invite { peer, descriptor } => {
                if state != SessionState::Idle {
                    warn!(state = state.as_str(), peer = %peer, "invite ignored, session busy");
                    return;
                }
                self.peer = Some(peer);
                self.remote_descriptor = descriptor;
                self.transition(SessionState::Invited, effects);
            }
            Signal::Descriptor(descriptor) => match state {
                SessionState::Idle => {
                    warn!("descriptor received while idle, ignored");
                }
                SessionState::Ended => {
                    debug!("descriptor received after session ended, ignored");
                }
                SessionState::Invited | SessionState::Active => {
                    self.remote_descriptor = Some(descriptor);
                }
                SessionState::Inviting => {
                    self.remote_descriptor = Some(descriptor);
                    self.transition(SessionState::Negotiating, effects);
                    self.try_activate(effects);
                }
                SessionState::Negotiating => {
                    self.remote_descriptor = Some(descriptor);
                    self.try_activate(effects);
                }
            },
            Signal::Candidate(candidate) => {
                if state.is_live() {
                    self.candidates.push(candidate);
                } else {
                    debug!(state = state.as_str(), "candidate ignored");
                }
            }
            Signal::Hangup => {
                if state.is_live() {
                    self.end(effects);
                } else {
                    debug!(state = state.as_str(), "hangup ignored");
                }
            }
        }
    }
}

/// A direct session with one peer, negotiated over a channel.
///
/// Clones share the same session. Its channel listeners are removed when
/// the last clone is dropped; keep a clone and [`reset`](Self::reset) it to
/// reuse the session instead.
#[derive(Clone)]
pub struct PeerSession {
    core: Rc<RefCell<SessionCore>>,
    channel: Channel,
    names: Rc<SignalNames>,
}

impl PeerSession {
    /// Attach a session to `channel` using the `rtc_*` vocabulary.
    pub fn new(channel: Channel, media: impl MediaCapability + 'static) -> Self {
        Self::with_names(channel, media, SignalNames::rtc())
    }

    pub fn with_names(
        channel: Channel,
        media: impl MediaCapability + 'static,
        names: SignalNames,
    ) -> Self {
        let media: SharedMedia = Rc::new(RefCell::new(media));
        let session = Self {
            core: Rc::new(RefCell::new(SessionCore {
                state: SessionState::Idle,
                peer: None,
                local_descriptor: None,
                remote_descriptor: None,
                local_media: None,
                remote_media: None,
                candidates: Vec::new(),
                media,
                observers: Vec::new(),
                pending: VecDeque::new(),
                draining: false,
                attachment: None,
            })),
            channel,
            names: Rc::new(names),
        };
        session.attach();
        session
    }

    fn attach(&self) {
        let mut ids = Vec::new();
        for name in self.names.all() {
            let weak = Rc::downgrade(&self.core);
            let channel = self.channel.clone();
            let names = Rc::clone(&self.names);
            ids.push(self.channel.on(name, move |event: &Event| {
                if let Some(session) = Self::revive(&weak, &channel, &names) {
                    session.on_event(event);
                }
            }));
        }

        let weak = Rc::downgrade(&self.core);
        let channel = self.channel.clone();
        let names = Rc::clone(&self.names);
        ids.push(self.channel.on(SystemKind::Disconnect, move |_event: &Event| {
            if let Some(session) = Self::revive(&weak, &channel, &names) {
                session.on_channel_disconnect();
            }
        }));

        self.core.borrow_mut().attachment = Some(Attachment {
            channel: self.channel.clone(),
            ids,
        });
    }

    fn revive(
        weak: &Weak<RefCell<SessionCore>>,
        channel: &Channel,
        names: &Rc<SignalNames>,
    ) -> Option<Self> {
        Some(Self {
            core: weak.upgrade()?,
            channel: channel.clone(),
            names: Rc::clone(names),
        })
    }

    pub fn state(&self) -> SessionState {
        self.core.borrow().state
    }

    pub fn names(&self) -> &SignalNames {
        &self.names
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Identity of the other side, once known.
    pub fn peer(&self) -> Option<String> {
        self.core.borrow().peer.clone()
    }

    pub fn local_descriptor(&self) -> Option<SessionDescriptor> {
        self.core.borrow().local_descriptor.clone()
    }

    pub fn remote_descriptor(&self) -> Option<SessionDescriptor> {
        self.core.borrow().remote_descriptor.clone()
    }

    pub fn local_media(&self) -> Option<MediaHandle> {
        self.core.borrow().local_media.clone()
    }

    pub fn remote_media(&self) -> Option<MediaHandle> {
        self.core.borrow().remote_media.clone()
    }

    /// Drain the remote candidates received so far.
    pub fn take_candidates(&self) -> Vec<Value> {
        std::mem::take(&mut self.core.borrow_mut().candidates)
    }

    /// Observe every state change as `(from, to)`.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: FnMut(SessionState, SessionState) + 'static,
    {
        let observer: Observer = Rc::new(RefCell::new(observer));
        self.core.borrow_mut().observers.push(observer);
    }

    /// Invite `peer`, capturing local media first.
    pub fn invite(&self, peer: &str, descriptor: Option<SessionDescriptor>) -> Result<()> {
        self.capture_for(SessionState::Idle, "invite")?;
        let signal = Signal::Invite {
            peer: peer.to_string(),
            descriptor: descriptor.clone(),
        };
        self.send_or_release(&signal)?;

        let mut effects = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            core.peer = Some(peer.to_string());
            core.local_descriptor = descriptor;
            core.remote_descriptor = None;
            core.transition(SessionState::Inviting, &mut effects);
        }
        self.apply(effects);
        Ok(())
    }

    /// Accept a received invite: capture media and answer with `descriptor`.
    pub fn accept_invite(&self, descriptor: SessionDescriptor) -> Result<()> {
        self.capture_for(SessionState::Invited, "accept an invite")?;
        self.send_or_release(&Signal::Descriptor(descriptor.clone()))?;

        let mut effects = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            core.local_descriptor = Some(descriptor);
            core.transition(SessionState::Negotiating, &mut effects);
            core.try_activate(&mut effects);
        }
        self.apply(effects);
        Ok(())
    }

    /// Send a descriptor outside the invite/accept steps, e.g. an offer
    /// that was not ready when the invite went out.
    pub fn send_descriptor(&self, descriptor: SessionDescriptor) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Inviting | SessionState::Negotiating | SessionState::Active
        ) {
            return Err(SessionError::InvalidTransition {
                state,
                action: "send a descriptor",
            });
        }
        self.send(&Signal::Descriptor(descriptor.clone()))?;
        self.core.borrow_mut().local_descriptor = Some(descriptor);
        Ok(())
    }

    /// Relay a connectivity candidate. Best effort; order is not preserved
    /// relative to descriptors.
    pub fn send_candidate(&self, candidate: Value) -> Result<()> {
        let state = self.state();
        if !state.is_live() {
            return Err(SessionError::InvalidTransition {
                state,
                action: "send a candidate",
            });
        }
        self.send(&Signal::Candidate(candidate))
    }

    /// End the session locally and tell the peer.
    pub fn hangup(&self) -> Result<()> {
        let state = self.state();
        if !state.is_live() {
            return Err(SessionError::InvalidTransition {
                state,
                action: "hang up",
            });
        }
        // The peer may already be unreachable; the local end still happens.
        if let Err(err) = self.send(&Signal::Hangup) {
            warn!(error = %err, "hangup signal not delivered");
        }
        let mut effects = Vec::new();
        self.core.borrow_mut().end(&mut effects);
        self.apply(effects);
        Ok(())
    }

    /// Return an ended session to idle for reuse.
    pub fn reset(&self) -> Result<()> {
        let mut effects = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            if core.state != SessionState::Ended {
                return Err(SessionError::InvalidTransition {
                    state: core.state,
                    action: "reset",
                });
            }
            core.peer = None;
            core.local_descriptor = None;
            core.remote_descriptor = None;
            core.candidates.clear();
            core.transition(SessionState::Idle, &mut effects);
        }
        self.apply(effects);
        Ok(())
    }

    /// Capture local media for `action` unless the session already holds
    /// some. The capability runs with no session state borrowed.
    fn capture_for(&self, required: SessionState, action: &'static str) -> Result<()> {
        let media = {
            let core = self.core.borrow();
            if core.state != required {
                return Err(SessionError::InvalidTransition {
                    state: core.state,
                    action,
                });
            }
            if core.local_media.is_some() {
                return Ok(());
            }
            Rc::clone(&core.media)
        };
        let local = {
            let mut media = media.try_borrow_mut().map_err(|_| SessionError::MediaBusy)?;
            media.capture_local_media()?
        };
        debug!(media = %local, "captured local media");

        let mut effects = Vec::new();
        let result = {
            let mut core = self.core.borrow_mut();
            if core.state != required {
                // The session moved on while capturing.
                effects.push(Effect::Release(local));
                Err(SessionError::InvalidTransition {
                    state: core.state,
                    action,
                })
            } else if core.local_media.is_some() {
                effects.push(Effect::Release(local));
                Ok(())
            } else {
                core.local_media = Some(local);
                Ok(())
            }
        };
        self.apply(effects);
        result
    }

    fn send_or_release(&self, signal: &Signal) -> Result<()> {
        self.send(signal).inspect_err(|_| {
            let mut effects = Vec::new();
            self.core.borrow_mut().release(&mut effects);
            self.apply(effects);
        })
    }

    fn send(&self, signal: &Signal) -> Result<()> {
        let name = signal.event_name(&self.names);
        debug!(event = name, "sending signal");
        self.channel.emit(name, signal.to_args())?;
        Ok(())
    }

    fn on_event(&self, event: &Event) {
        let Some(name) = event.name() else {
            return;
        };
        let signal = match Signal::parse(&self.names, name, event.args()) {
            Ok(Some(signal)) => signal,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "dropping malformed signal");
                return;
            }
        };
        let mut effects = Vec::new();
        self.core.borrow_mut().receive(signal, &mut effects);
        self.apply(effects);
    }

    fn on_channel_disconnect(&self) {
        let mut effects = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            if core.state.is_live() {
                info!("channel disconnected, ending session");
                core.end(&mut effects);
            }
        }
        self.apply(effects);
    }

    /// Run queued effects in order: observers see each state change and the
    /// media capability renders or releases.
    ///
    /// Nothing in the session is borrowed while an observer or the
    /// capability runs. Effects raised meanwhile are queued and run by the
    /// outermost call after the current one.
    fn apply(&self, effects: Effects) {
        {
            let mut core = self.core.borrow_mut();
            core.pending.extend(effects);
            if core.draining || core.pending.is_empty() {
                return;
            }
            core.draining = true;
        }
        let _guard = DrainingGuard(&self.core);

        loop {
            let (next, observers, media) = {
                let mut core = self.core.borrow_mut();
                (
                    core.pending.pop_front(),
                    core.observers.clone(),
                    Rc::clone(&core.media),
                )
            };
            let Some(effect) = next else { break };
            match effect {
                Effect::Changed(from, to) => {
                    for observer in &observers {
                        (&mut *observer.borrow_mut())(from, to);
                    }
                }
                Effect::Render(remote) => match media.try_borrow_mut() {
                    Ok(mut media) => media.render_remote_media(&remote),
                    Err(_) => warn!(media = %remote, "media capability busy, render skipped"),
                },
                Effect::Release(local) => match media.try_borrow_mut() {
                    Ok(mut media) => {
                        debug!(media = %local, "releasing local media");
                        media.release_local_media(local);
                    }
                    Err(_) => warn!(media = %local, "media capability busy, release skipped"),
                },
            }
        }
    }
}

struct DrainingGuard<'a>(&'a Rc<RefCell<SessionCore>>);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().draining = false;
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("PeerSession")
            .field("state", &core.state)
            .field("peer", &core.peer)
            .field("channel", &self.channel.endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SessionState::*;
        assert!(Idle.can_transition(Inviting));
        assert!(Idle.can_transition(Invited));
        assert!(Inviting.can_transition(Negotiating));
        assert!(Negotiating.can_transition(Active));
        assert!(Active.can_transition(Ended));
        assert!(Invited.can_transition(Ended));
        assert!(Ended.can_transition(Idle));

        assert!(!Idle.can_transition(Active));
        assert!(!Idle.can_transition(Ended));
        assert!(!Ended.can_transition(Ended));
        assert!(!Ended.can_transition(Negotiating));
        assert!(!Active.can_transition(Negotiating));
        assert!(!Inviting.can_transition(Active));
    }

    #[test]
    fn liveness() {
        assert!(!SessionState::Idle.is_live());
        assert!(!SessionState::Ended.is_live());
        assert!(SessionState::Inviting.is_live());
        assert!(SessionState::Active.is_live());
    }
}
