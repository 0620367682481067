use std::time::{Duration, Instant};

use chanmux_client::{AckStatus, ChannelState};
use tracing::{debug, info};

use crate::cmd::driver::{self, Wait};
use crate::cmd::{load_config, parse_args_json, parse_duration, EmitArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR};
use crate::output::{print_ack, OutputFormat};

pub fn run(args: EmitArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let event_args = parse_args_json("--args", args.args.as_deref())?;
    let config = load_config(args.config.as_deref())?;
    let idle = Duration::from_millis(config.stream.poll_interval_ms.max(1));
    let started = Instant::now();

    let mut manager = driver::connect(&args.path, config)?;
    let channel = manager
        .channel(&args.channel)
        .map_err(|err| client_error("invalid --channel", err))?;

    let joined = driver::run_until(&mut manager, Some(timeout), idle, || true, |_| {
        channel.state() == ChannelState::Connected
    });
    check_wait(joined, "waiting for channel connect")?;
    debug!(channel = %channel.endpoint(), "channel connected");

    if !args.ack {
        channel
            .emit(&args.name, event_args)
            .map_err(|err| client_error("emit failed", err))?;
        manager.close();
        info!(channel = %channel.endpoint(), name = %args.name, "event sent");
        return Ok(SUCCESS);
    }

    let mut token = channel
        .emit_with_ack(&args.name, event_args)
        .map_err(|err| client_error("emit failed", err))?;
    let ack_id = token.id();
    let remaining = timeout.saturating_sub(started.elapsed());

    let mut reply = AckStatus::Pending;
    let waited = driver::run_until(&mut manager, Some(remaining), idle, || true, |_| {
        reply = token.try_take();
        !matches!(reply, AckStatus::Pending)
    });
    check_wait(waited, "waiting for ack")?;
    manager.close();

    match reply {
        AckStatus::Resolved(values) => {
            print_ack(channel.endpoint().as_str(), ack_id, &values, format);
            Ok(SUCCESS)
        }
        AckStatus::Dropped | AckStatus::Consumed => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("ack {ack_id} dropped: connection lost before the reply"),
        )),
        AckStatus::Pending => Err(CliError::new(TIMEOUT, format!("ack {ack_id} still pending"))),
    }
}

fn check_wait(outcome: Wait, context: &str) -> CliResult<()> {
    match outcome {
        Wait::Done => Ok(()),
        Wait::TimedOut => Err(CliError::new(TIMEOUT, format!("{context}: timed out"))),
        Wait::Closed | Wait::Interrupted => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("{context}: connection closed"),
        )),
    }
}
