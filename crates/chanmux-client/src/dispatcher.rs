//! Routing of inbound frames to channels.

use std::rc::Rc;
use std::time::Instant;

use chanmux_frame::{
    AckMode, AckRequest, Endpoint, ErrorAdvice, ErrorReason, Packet, PacketKind, Value,
};
use tracing::{debug, trace, warn};

use crate::event::{DisconnectReason, ErrorEvent, Event, Payload, Responder, SystemEvent};
use crate::state::{ChannelState, ClientState, SharedState};

/// Apply one inbound packet to the connection state.
///
/// Listener work is only queued here; the caller drains the mailbox once
/// the state borrow is released.
pub(crate) fn route_inbound(shared: &Rc<SharedState>, state: &mut ClientState, packet: Packet, now: Instant) {
    let Packet {
        endpoint,
        ack,
        kind,
    } = packet;
    trace!(endpoint = %endpoint, kind = kind.type_name(), "inbound packet");

    match kind {
        PacketKind::Heartbeat => {
            let _ = state.send_packet(Packet::heartbeat());
        }
        PacketKind::Noop => {}
        PacketKind::Disconnect if endpoint.is_root() => {
            state.close(DisconnectReason::ServerDisconnect);
        }
        PacketKind::Error {
            reason,
            advice: Some(ErrorAdvice::Reconnect),
        } => {
            let reason = reason.map_or("unspecified", ErrorReason::as_str);
            warn!(endpoint = %endpoint, reason, "remote advised reconnect");
            state.transport_lost(
                DisconnectReason::TransportClose(format!("server error: {reason}")),
                now,
            );
        }
        kind => route_to_channel(shared, state, endpoint, ack, kind),
    }
}

fn route_to_channel(
    shared: &Rc<SharedState>,
    state: &mut ClientState,
    endpoint: Endpoint,
    ack: Option<AckRequest>,
    kind: PacketKind,
) {
    let Some(slot) = state.channels.get_mut(&endpoint) else {
        warn!(endpoint = %endpoint, kind = kind.type_name(), "dropping packet for unknown channel");
        return;
    };
    if slot.state == ChannelState::Disconnected {
        debug!(endpoint = %endpoint, kind = kind.type_name(), "dropping late packet for disconnected channel");
        return;
    }

    match kind {
        PacketKind::Connect { .. } => {
            if slot.state == ChannelState::Connecting {
                slot.state = ChannelState::Connected;
                debug!(endpoint = %endpoint, "channel connected");
                state.push_event(&endpoint, Event::System(SystemEvent::Connect));
            }
        }
        PacketKind::Disconnect => {
            state.leave_channel(&endpoint, DisconnectReason::ServerDisconnect);
        }
        PacketKind::Ack { ack_id, args } => {
            if !slot.acks.resolve(ack_id, args) {
                warn!(endpoint = %endpoint, ack_id, "ack for unknown or resolved id");
            }
        }
        PacketKind::Error { reason, .. } => {
            state.push_event(&endpoint, Event::System(SystemEvent::Error(ErrorEvent::Server(reason))));
        }
        PacketKind::Message { data } => {
            deliver_app(shared, state, endpoint, ack, |responder| Event::Message {
                payload: Payload::Text(data),
                responder,
            });
        }
        PacketKind::Json { data } => {
            deliver_app(shared, state, endpoint, ack, |responder| Event::Message {
                payload: Payload::Json(data),
                responder,
            });
        }
        PacketKind::Event { name, args } => {
            deliver_app(shared, state, endpoint, ack, |responder| Event::App {
                name,
                args,
                responder,
            });
        }
        PacketKind::Heartbeat | PacketKind::Noop => {}
    }
}

/// Queue an application delivery, joining the channel first if the remote
/// skipped the connect frame.
fn deliver_app(
    shared: &Rc<SharedState>,
    state: &mut ClientState,
    endpoint: Endpoint,
    ack: Option<AckRequest>,
    build: impl FnOnce(Option<Responder>) -> Event,
) {
    if let Some(slot) = state.channels.get_mut(&endpoint) {
        if slot.state == ChannelState::Connecting {
            slot.state = ChannelState::Connected;
            debug!(endpoint = %endpoint, "implicit connect before first event");
            state.push_event(&endpoint, Event::System(SystemEvent::Connect));
        }
    }

    let responder = match ack {
        Some(AckRequest {
            id,
            mode: AckMode::Data,
        }) => Some(Responder::new(Rc::downgrade(shared), endpoint.clone(), id, state.epoch)),
        Some(AckRequest {
            id,
            mode: AckMode::Auto,
        }) => {
            let reply = Packet::ack_reply(endpoint.clone(), id, Vec::<Value>::new());
            if let Err(err) = state.send_packet(reply) {
                warn!(endpoint = %endpoint, ack_id = id, error = %err, "automatic ack failed");
            }
            None
        }
        None => None,
    };
    state.push_event(&endpoint, build(responder));
}
