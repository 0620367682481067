mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "chanmux",
    version,
    about = "Channel-multiplexed event client and packet tool"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true, env = "CHANMUX_LOG")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encode_subcommand() {
        let cli = Cli::try_parse_from([
            "chanmux", "encode", "--type", "event", "-c", "/chat", "--name", "hi", "--id", "3",
            "--ack-data",
        ])
        .expect("encode args should parse");

        let Command::Encode(args) = cli.command else {
            panic!("expected encode");
        };
        assert_eq!(args.channel, "/chat");
        assert_eq!(args.id, Some(3));
        assert!(args.ack_data);
    }

    #[test]
    fn ack_data_requires_id() {
        let err = Cli::try_parse_from(["chanmux", "encode", "--name", "hi", "--ack-data"])
            .expect_err("--ack-data without --id should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_emit_subcommand() {
        let cli = Cli::try_parse_from([
            "chanmux",
            "emit",
            "/tmp/test.sock",
            "--channel",
            "/chat",
            "--name",
            "greet",
            "--args",
            "[1]",
            "--ack",
            "--timeout",
            "3s",
        ])
        .expect("emit args should parse");
        assert!(matches!(cli.command, Command::Emit(ref args) if args.ack && args.timeout == "3s"));
    }

    #[test]
    fn emit_requires_name() {
        let err = Cli::try_parse_from(["chanmux", "emit", "/tmp/test.sock"])
            .expect_err("emit without --name should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn listen_splits_channel_list() {
        let cli = Cli::try_parse_from([
            "chanmux",
            "listen",
            "/tmp/test.sock",
            "--channels",
            "/chat,/news",
            "--events",
            "offer,answer",
            "--count",
            "2",
        ])
        .expect("listen args should parse");

        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.channels, vec!["/chat", "/news"]);
        assert_eq!(args.events, vec!["offer", "answer"]);
        assert_eq!(args.count, Some(2));
    }

    #[test]
    fn decode_requires_input() {
        let err = Cli::try_parse_from(["chanmux", "decode"]).expect_err("decode needs packets");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
