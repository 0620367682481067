use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chanmux_client::ClientConfig;
use chanmux_transport::StreamConfig;
use clap::{Args, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::Value;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod driver;
pub mod emit;
pub mod encode;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a packet and print its wire text.
    Encode(EncodeArgs),
    /// Parse wire text and print the packet.
    Decode(DecodeArgs),
    /// Connect, join a channel and emit one event.
    Emit(EmitArgs),
    /// Connect, join channels and print received events.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Emit(args) => emit::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PacketType {
    Disconnect,
    Connect,
    Heartbeat,
    Message,
    Json,
    Event,
    Ack,
    Error,
    Noop,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Packet type.
    #[arg(long = "type", value_enum, default_value = "event")]
    pub kind: PacketType,
    /// Channel endpoint, e.g. /chat.
    #[arg(long, short = 'c', default_value = "/")]
    pub channel: String,
    /// Event name (event packets).
    #[arg(long)]
    pub name: Option<String>,
    /// Arguments as a JSON array (event and ack packets).
    #[arg(long)]
    pub args: Option<String>,
    /// Payload: message text, JSON document, or connect query.
    #[arg(long)]
    pub data: Option<String>,
    /// Request an ack with this message id.
    #[arg(long)]
    pub id: Option<u64>,
    /// Ask the receiver to answer the ack with data.
    #[arg(long, requires = "id")]
    pub ack_data: bool,
    /// Id being acknowledged (ack packets).
    #[arg(long)]
    pub ack_id: Option<u64>,
    /// Error reason code (error packets).
    #[arg(long)]
    pub reason: Option<u32>,
    /// Error advice code (error packets).
    #[arg(long)]
    pub advice: Option<u32>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Wire packets to decode. Use `-` to read one packet per stdin line.
    #[arg(required = true)]
    pub packets: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EmitArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel endpoint to join.
    #[arg(long, short = 'c', default_value = "/")]
    pub channel: String,
    /// Event name.
    #[arg(long)]
    pub name: String,
    /// Arguments as a JSON array.
    #[arg(long)]
    pub args: Option<String>,
    /// Wait for the remote to acknowledge and print the reply.
    #[arg(long)]
    pub ack: bool,
    /// Maximum time to wait for the channel and the ack (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// JSON config file (client and stream settings).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel endpoints to join (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "/")]
    pub channels: Vec<String>,
    /// Application event names to print (comma-separated). Messages and
    /// lifecycle events are always printed. Without this every event is.
    #[arg(long, value_delimiter = ',')]
    pub events: Vec<String>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// JSON config file (client and stream settings).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}

/// Contents of a `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub client: ClientConfig,
    pub stream: StreamConfig,
}

pub fn load_config(path: Option<&Path>) -> CliResult<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::usage(format!("invalid config {}: {err}", path.display()))
    })
}

/// Parse an optional `--args` value; it must be a JSON array.
pub fn parse_args_json(flag: &str, input: Option<&str>) -> CliResult<Vec<Value>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(CliError::usage(format!("{flag} must be a JSON array"))),
        Err(err) => Err(CliError::usage(format!("{flag} is not valid JSON: {err}"))),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
