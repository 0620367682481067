use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::endpoint::Endpoint;
use crate::error::{FrameError, Result};
use crate::packet::{AckMode, AckRequest, ErrorAdvice, ErrorReason, Packet, PacketKind};

#[derive(Serialize)]
struct EventBodyRef<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "no_args")]
    args: &'a [Value],
}

fn no_args(args: &&[Value]) -> bool {
    args.is_empty()
}

#[derive(Deserialize)]
struct EventBody {
    name: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Encode a packet into its wire text.
///
/// Wire format:
/// ```text
/// <type> ":" [<id> ["+"]] ":" [<endpoint>] [":" <data>]
/// ```
/// The data segment is omitted entirely when the packet has none.
pub fn encode(packet: &Packet) -> Result<Bytes> {
    encode_to_string(packet).map(Bytes::from)
}

/// Encode a packet into its wire text as a `String`.
pub fn encode_to_string(packet: &Packet) -> Result<String> {
    let data: Option<String> = match &packet.kind {
        PacketKind::Disconnect | PacketKind::Heartbeat | PacketKind::Noop => None,
        PacketKind::Connect { query } => (!query.is_empty()).then(|| query.clone()),
        PacketKind::Message { data } => (!data.is_empty()).then(|| data.clone()),
        PacketKind::Json { data } => Some(serde_json::to_string(data)?),
        PacketKind::Event { name, args } => Some(serde_json::to_string(&EventBodyRef {
            name,
            args,
        })?),
        PacketKind::Ack { ack_id, args } => {
            if args.is_empty() {
                Some(ack_id.to_string())
            } else {
                Some(format!("{ack_id}+{}", serde_json::to_string(args)?))
            }
        }
        PacketKind::Error { reason, advice } => match (reason, advice) {
            (None, None) => None,
            (reason, advice) => {
                let mut out = reason.map(|r| r.code().to_string()).unwrap_or_default();
                if let Some(advice) = advice {
                    out.push('+');
                    out.push_str(&advice.code().to_string());
                }
                Some(out)
            }
        },
    };

    let id = match packet.ack {
        Some(AckRequest {
            id,
            mode: AckMode::Data,
        }) => format!("{id}+"),
        Some(AckRequest {
            id,
            mode: AckMode::Auto,
        }) => id.to_string(),
        None => String::new(),
    };

    let mut out = format!(
        "{}:{}:{}",
        packet.kind.code(),
        id,
        packet.endpoint.as_str()
    );
    if let Some(data) = data {
        out.push(':');
        out.push_str(&data);
    }
    Ok(out)
}

/// Decode one packet from its wire text.
///
/// Unknown event names are not an error; only structural problems are.
pub fn decode(wire: &[u8]) -> Result<Packet> {
    let text = std::str::from_utf8(wire)
        .map_err(|err| FrameError::malformed(format!("packet is not valid UTF-8: {err}")))?;
    decode_str(text)
}

/// Decode one packet from wire text already known to be UTF-8.
pub fn decode_str(text: &str) -> Result<Packet> {
    let mut parts = text.splitn(4, ':');
    let type_part = parts.next().unwrap_or_default();
    let (Some(id_part), Some(endpoint_part)) = (parts.next(), parts.next()) else {
        return Err(FrameError::malformed(format!(
            "expected '<type>:<id>:<endpoint>', got {:?}",
            preview(text)
        )));
    };
    let data = parts.next().unwrap_or("");

    let type_code: u8 = type_part
        .parse()
        .map_err(|_| FrameError::malformed(format!("invalid packet type {type_part:?}")))?;
    let ack = parse_ack_request(id_part)?;
    let endpoint = Endpoint::from_wire(endpoint_part);

    let kind = match type_code {
        0 => PacketKind::Disconnect,
        1 => PacketKind::Connect {
            query: data.to_string(),
        },
        2 => PacketKind::Heartbeat,
        3 => PacketKind::Message {
            data: data.to_string(),
        },
        4 => PacketKind::Json {
            data: parse_json(data, "json payload")?,
        },
        5 => {
            let body: EventBody = serde_json::from_str(data)
                .map_err(|err| FrameError::malformed(format!("invalid event payload: {err}")))?;
            PacketKind::Event {
                name: body.name,
                args: body.args,
            }
        }
        6 => parse_ack_body(data)?,
        7 => parse_error_body(data)?,
        8 => PacketKind::Noop,
        other => {
            return Err(FrameError::malformed(format!(
                "unknown packet type {other}"
            )))
        }
    };

    trace!(kind = kind.type_name(), endpoint = %endpoint, "decoded packet");
    Ok(Packet {
        endpoint,
        ack,
        kind,
    })
}

fn parse_ack_request(id_part: &str) -> Result<Option<AckRequest>> {
    if id_part.is_empty() {
        return Ok(None);
    }
    let (digits, mode) = match id_part.strip_suffix('+') {
        Some(digits) => (digits, AckMode::Data),
        None => (id_part, AckMode::Auto),
    };
    let id = digits
        .parse::<u64>()
        .map_err(|_| FrameError::malformed(format!("invalid message id {id_part:?}")))?;
    Ok(Some(AckRequest { id, mode }))
}

fn parse_ack_body(data: &str) -> Result<PacketKind> {
    let (id_text, args_text) = match data.split_once('+') {
        Some((id, args)) => (id, Some(args)),
        None => (data, None),
    };
    let ack_id = id_text
        .parse::<u64>()
        .map_err(|_| FrameError::malformed(format!("invalid ack id {id_text:?}")))?;
    let args = match args_text {
        None | Some("") => Vec::new(),
        Some(text) => match parse_json(text, "ack arguments")? {
            Value::Array(args) => args,
            _ => {
                return Err(FrameError::malformed(
                    "ack arguments must be a JSON array",
                ))
            }
        },
    };
    Ok(PacketKind::Ack { ack_id, args })
}

fn parse_error_body(data: &str) -> Result<PacketKind> {
    let (reason_text, advice_text) = match data.split_once('+') {
        Some((reason, advice)) => (reason, Some(advice)),
        None => (data, None),
    };
    let reason = if reason_text.is_empty() {
        None
    } else {
        Some(ErrorReason::from_code(parse_code(reason_text, "error reason")?))
    };
    let advice = match advice_text {
        None | Some("") => None,
        Some(text) => Some(ErrorAdvice::from_code(parse_code(text, "error advice")?)),
    };
    Ok(PacketKind::Error { reason, advice })
}

fn parse_code(text: &str, what: &str) -> Result<u32> {
    text.parse::<u32>()
        .map_err(|_| FrameError::malformed(format!("invalid {what} {text:?}")))
}

fn parse_json(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|err| FrameError::malformed(format!("invalid {what}: {err}")))
}

fn preview(text: &str) -> String {
    text.chars().take(20).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn chat() -> Endpoint {
        Endpoint::new("/chat").unwrap()
    }

    fn enc(packet: &Packet) -> String {
        encode_to_string(packet).unwrap()
    }

    #[test]
    fn encode_disconnect_and_connect() {
        assert_eq!(
            enc(&Packet::disconnect(Endpoint::new("/woot").unwrap())),
            "0::/woot"
        );
        assert_eq!(enc(&Packet::connect(Endpoint::new("/tobi").unwrap())), "1::/tobi");
        assert_eq!(enc(&Packet::connect(Endpoint::root())), "1::");

        let with_query = Packet::new(
            Endpoint::new("/test").unwrap(),
            PacketKind::Connect {
                query: "?test=1".to_string(),
            },
        );
        assert_eq!(enc(&with_query), "1::/test:?test=1");
    }

    #[test]
    fn encode_heartbeat_and_noop() {
        assert_eq!(enc(&Packet::heartbeat()), "2::");
        assert_eq!(enc(&Packet::new(Endpoint::root(), PacketKind::Noop)), "8::");
    }

    #[test]
    fn encode_message() {
        assert_eq!(enc(&Packet::message(Endpoint::root(), "woot")), "3:::woot");
        let acked = Packet::message(Endpoint::new("/tobi").unwrap(), "").with_ack(5, AckMode::Auto);
        assert_eq!(enc(&acked), "3:5:/tobi");
    }

    #[test]
    fn encode_json() {
        assert_eq!(enc(&Packet::json(Endpoint::root(), json!("2"))), "4:::\"2\"");
        let acked = Packet::json(Endpoint::root(), json!({"a": "b"})).with_ack(1, AckMode::Data);
        assert_eq!(enc(&acked), "4:1+::{\"a\":\"b\"}");
    }

    #[test]
    fn encode_event() {
        let bare = Packet::event(Endpoint::root(), "woot", vec![]);
        assert_eq!(enc(&bare), "5:::{\"name\":\"woot\"}");

        let acked = Packet::event(Endpoint::root(), "tobi", vec![]).with_ack(1, AckMode::Data);
        assert_eq!(enc(&acked), "5:1+::{\"name\":\"tobi\"}");

        let with_args = Packet::event(chat(), "edwald", vec![json!({"a": "b"}), json!(2), json!("3")]);
        assert_eq!(
            enc(&with_args),
            "5::/chat:{\"name\":\"edwald\",\"args\":[{\"a\":\"b\"},2,\"3\"]}"
        );
    }

    #[test]
    fn encode_ack() {
        assert_eq!(enc(&Packet::ack_reply(Endpoint::root(), 140, vec![])), "6:::140");
        assert_eq!(
            enc(&Packet::ack_reply(chat(), 12, vec![json!("woot"), json!("wa")])),
            "6::/chat:12+[\"woot\",\"wa\"]"
        );
    }

    #[test]
    fn encode_error() {
        let empty = Packet::new(
            Endpoint::root(),
            PacketKind::Error {
                reason: None,
                advice: None,
            },
        );
        assert_eq!(enc(&empty), "7::");

        let full = Packet::new(
            Endpoint::root(),
            PacketKind::Error {
                reason: Some(ErrorReason::Unauthorized),
                advice: Some(ErrorAdvice::Reconnect),
            },
        );
        assert_eq!(enc(&full), "7:::2+0");
    }

    #[test]
    fn decode_event_with_data_ack() {
        let packet = decode(b"5:1+:/chat:{\"name\":\"callmeback\",\"args\":[\"a\",\"b\"]}").unwrap();
        assert_eq!(packet.endpoint, chat());
        assert_eq!(
            packet.ack,
            Some(AckRequest {
                id: 1,
                mode: AckMode::Data
            })
        );
        assert_eq!(
            packet.kind,
            PacketKind::Event {
                name: "callmeback".to_string(),
                args: vec![json!("a"), json!("b")],
            }
        );
    }

    #[test]
    fn decode_event_without_args() {
        let packet = decode(b"5:::{\"name\":\"woot\"}").unwrap();
        assert_eq!(
            packet.kind,
            PacketKind::Event {
                name: "woot".to_string(),
                args: vec![],
            }
        );
        assert!(packet.ack.is_none());
    }

    #[test]
    fn decode_message_keeps_colons_in_data() {
        let packet = decode(b"3:::a:b:c").unwrap();
        assert_eq!(
            packet.kind,
            PacketKind::Message {
                data: "a:b:c".to_string()
            }
        );
    }

    #[test]
    fn decode_ack_variants() {
        assert_eq!(
            decode(b"6:::140").unwrap().kind,
            PacketKind::Ack {
                ack_id: 140,
                args: vec![]
            }
        );
        assert_eq!(
            decode(b"6:::12+[\"woot\",\"wa\"]").unwrap().kind,
            PacketKind::Ack {
                ack_id: 12,
                args: vec![json!("woot"), json!("wa")]
            }
        );
    }

    #[test]
    fn decode_error_variants() {
        assert_eq!(
            decode(b"7:::2+0").unwrap().kind,
            PacketKind::Error {
                reason: Some(ErrorReason::Unauthorized),
                advice: Some(ErrorAdvice::Reconnect),
            }
        );
        assert_eq!(
            decode(b"7:::0").unwrap().kind,
            PacketKind::Error {
                reason: Some(ErrorReason::TransportNotSupported),
                advice: None,
            }
        );
        assert_eq!(
            decode(b"7::").unwrap().kind,
            PacketKind::Error {
                reason: None,
                advice: None,
            }
        );
    }

    #[test]
    fn unknown_event_names_are_not_errors() {
        let packet = decode(b"5:::{\"name\":\"never-heard-of-it\",\"args\":[null]}").unwrap();
        assert_eq!(packet.event_name(), Some("never-heard-of-it"));
    }

    #[test]
    fn malformed_inputs_rejected() {
        let cases: [&[u8]; 10] = [
            b"",
            b"5",
            b"5:",
            b"x::",
            b"9::",
            b"5:abc::{}",
            b"4:::{not json",
            b"5:::{\"args\":[]}",
            b"6:::1+{\"a\":1}",
            b"\xff\xfe::",
        ];
        for case in cases {
            assert!(
                matches!(decode(case), Err(FrameError::MalformedFrame(_))),
                "expected malformed for {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn roundtrip_utf8_and_control_characters() {
        let tricky = "asd \r f√©\n\\'blah — 日本語 🎉 \u{0}";
        let frames = vec![
            Packet::event(chat(), "chat", vec![json!(tricky)]),
            Packet::event(chat(), "empty", vec![]),
            Packet::event(
                Endpoint::root(),
                "multi",
                vec![json!(1), json!(2.5), json!(true), json!(null), json!({"k": [tricky]})],
            )
            .with_ack(7, AckMode::Data),
            Packet::message(chat(), tricky).with_ack(3, AckMode::Auto),
            Packet::json(Endpoint::root(), json!({"asdfblah": tricky})),
            Packet::ack_reply(chat(), 9, vec![json!("ackprm1"), json!("ackprm2")]),
        ];

        for frame in frames {
            let wire = encode(&frame).unwrap();
            assert_eq!(decode(&wire).unwrap(), frame);
        }
    }
}
