use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use chanmux_client::{Endpoint, Event, Payload, SystemEvent};
use chanmux_frame::{AckMode, Packet, PacketKind, Value};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Structured view of one decoded packet.
#[derive(Debug, Serialize, PartialEq)]
pub struct PacketOutput {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<&'static str>,
}

impl PacketOutput {
    pub fn from_packet(packet: &Packet) -> Self {
        let mut out = Self {
            kind: packet.kind.type_name(),
            endpoint: packet.endpoint.to_string(),
            id: packet.ack.map(|ack| ack.id),
            ack: packet.ack.map(|ack| match ack.mode {
                AckMode::Auto => "auto",
                AckMode::Data => "data",
            }),
            name: None,
            args: None,
            data: None,
            ack_id: None,
            reason: None,
            advice: None,
        };
        match &packet.kind {
            PacketKind::Connect { query } if !query.is_empty() => {
                out.data = Some(Value::String(query.clone()));
            }
            PacketKind::Message { data } => out.data = Some(Value::String(data.clone())),
            PacketKind::Json { data } => out.data = Some(data.clone()),
            PacketKind::Event { name, args } => {
                out.name = Some(name.clone());
                out.args = Some(args.clone());
            }
            PacketKind::Ack { ack_id, args } => {
                out.ack_id = Some(*ack_id);
                out.args = Some(args.clone());
            }
            PacketKind::Error { reason, advice } => {
                out.reason = reason.map(|reason| reason.as_str());
                out.advice = advice.map(|advice| match advice {
                    chanmux_frame::ErrorAdvice::Reconnect => "reconnect",
                    chanmux_frame::ErrorAdvice::Other(_) => "unknown",
                });
            }
            _ => {}
        }
        out
    }

    fn summary(&self) -> String {
        if let Some(name) = &self.name {
            let args = Value::Array(self.args.clone().unwrap_or_default());
            return format!("{name} {args}");
        }
        if let Some(args) = &self.args {
            return Value::Array(args.clone()).to_string();
        }
        if let Some(data) = &self.data {
            return match data {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
        }
        self.reason.unwrap_or_default().to_string()
    }
}

pub fn print_packet(packet: &Packet, wire: &str, format: OutputFormat) {
    let out = PacketOutput::from_packet(packet);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TYPE", "ENDPOINT", "ID", "BODY"]);
            table.add_row(vec![
                out.kind.to_string(),
                out.endpoint.clone(),
                out.id.map(|id| id.to_string()).unwrap_or_default(),
                out.summary(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} endpoint={} id={} body={}",
                out.kind,
                out.endpoint,
                out.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
                out.summary()
            );
        }
        OutputFormat::Raw => println!("{wire}"),
    }
}

#[derive(Serialize)]
struct WireOutput<'a> {
    wire: &'a str,
}

pub fn print_wire(wire: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&WireOutput { wire }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["WIRE"]);
            table.add_row(vec![wire.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!("{wire}"),
    }
}

/// One event delivered to a channel listener.
#[derive(Debug, Serialize)]
pub struct EventRecord {
    pub channel: String,
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
    pub timestamp: String,
}

impl EventRecord {
    pub fn from_event(endpoint: &Endpoint, event: &Event) -> Self {
        let (kind, name, args, detail) = match event {
            Event::System(system) => {
                let detail = match system {
                    SystemEvent::Connect => None,
                    SystemEvent::Disconnect { reason } => Some(reason.to_string()),
                    SystemEvent::Reconnecting { attempt, delay } => {
                        Some(format!("attempt {attempt} in {}ms", delay.as_millis()))
                    }
                    SystemEvent::Reconnect { attempts } => Some(format!("after {attempts} attempts")),
                    SystemEvent::Error(error) => Some(error.to_string()),
                };
                ("system", system.kind().as_str().to_string(), Vec::new(), detail)
            }
            Event::Message { payload, .. } => {
                let arg = match payload {
                    Payload::Text(text) => Value::String(text.clone()),
                    Payload::Json(value) => value.clone(),
                };
                ("message", "message".to_string(), vec![arg], None)
            }
            Event::App { name, args, .. } => ("event", name.clone(), args.clone(), None),
        };
        Self {
            channel: endpoint.to_string(),
            kind,
            name,
            args,
            detail,
            ack_id: event.responder().map(|responder| responder.ack_id()),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_event(record: &EventRecord, format: OutputFormat) {
    let args = Value::Array(record.args.clone()).to_string();
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "KIND", "NAME", "ARGS", "DETAIL"]);
            table.add_row(vec![
                record.channel.clone(),
                record.kind.to_string(),
                record.name.clone(),
                args,
                record.detail.clone().unwrap_or_default(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let detail = record
                .detail
                .as_deref()
                .map(|detail| format!(" ({detail})"))
                .unwrap_or_default();
            println!("[{}] {} {}{}", record.channel, record.name, args, detail);
        }
        OutputFormat::Raw => println!("{} {}", record.name, args),
    }
}

#[derive(Serialize)]
struct AckOutput<'a> {
    channel: &'a str,
    ack_id: u64,
    args: &'a [Value],
}

pub fn print_ack(channel: &str, ack_id: u64, args: &[Value], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&AckOutput {
            channel,
            ack_id,
            args,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "ACK", "ARGS"]);
            table.add_row(vec![
                channel.to_string(),
                ack_id.to_string(),
                Value::Array(args.to_vec()).to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("ack {ack_id} on {channel}: {}", Value::Array(args.to_vec()))
        }
        OutputFormat::Raw => println!("{}", Value::Array(args.to_vec())),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
