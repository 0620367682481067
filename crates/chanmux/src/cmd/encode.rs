use chanmux_frame::{
    encode_to_string, AckMode, Endpoint, ErrorAdvice, ErrorReason, Packet, PacketKind, Value,
};

use crate::cmd::{parse_args_json, EncodeArgs, PacketType};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS};
use crate::output::{print_wire, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let packet = build_packet(&args)?;
    let wire = encode_to_string(&packet).map_err(|err| frame_error("encode failed", err))?;
    print_wire(&wire, format);
    Ok(SUCCESS)
}

fn build_packet(args: &EncodeArgs) -> CliResult<Packet> {
    let endpoint = Endpoint::new(args.channel.as_str())
        .map_err(|err| frame_error("invalid --channel", err))?;
    let data = args.data.clone().unwrap_or_default();

    let kind = match args.kind {
        PacketType::Disconnect => PacketKind::Disconnect,
        PacketType::Connect => PacketKind::Connect { query: data },
        PacketType::Heartbeat => PacketKind::Heartbeat,
        PacketType::Noop => PacketKind::Noop,
        PacketType::Message => PacketKind::Message { data },
        PacketType::Json => {
            let text = args
                .data
                .as_deref()
                .ok_or_else(|| CliError::usage("json packets need --data"))?;
            let data: Value = serde_json::from_str(text)
                .map_err(|err| CliError::usage(format!("--data is not valid JSON: {err}")))?;
            PacketKind::Json { data }
        }
        PacketType::Event => {
            let name = args
                .name
                .clone()
                .ok_or_else(|| CliError::usage("event packets need --name"))?;
            PacketKind::Event {
                name,
                args: parse_args_json("--args", args.args.as_deref())?,
            }
        }
        PacketType::Ack => {
            let ack_id = args
                .ack_id
                .ok_or_else(|| CliError::usage("ack packets need --ack-id"))?;
            PacketKind::Ack {
                ack_id,
                args: parse_args_json("--args", args.args.as_deref())?,
            }
        }
        PacketType::Error => PacketKind::Error {
            reason: args.reason.map(ErrorReason::from_code),
            advice: args.advice.map(ErrorAdvice::from_code),
        },
    };

    let packet = Packet::new(endpoint, kind);
    Ok(match args.id {
        Some(id) => {
            let mode = if args.ack_data {
                AckMode::Data
            } else {
                AckMode::Auto
            };
            packet.with_ack(id, mode)
        }
        None => packet,
    })
}
