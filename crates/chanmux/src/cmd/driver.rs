//! Blocking drive loop around the sans-IO connection manager.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chanmux_client::{ConnectionManager, ConnectionState};
use chanmux_transport::UnixConnector;
use tracing::debug;

use crate::cmd::CliConfig;
use crate::exit::{client_error, CliResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Done,
    TimedOut,
    Closed,
    Interrupted,
}

pub fn connect(path: &Path, config: CliConfig) -> CliResult<ConnectionManager> {
    let connector = UnixConnector::with_config(path, config.stream);
    let mut manager = ConnectionManager::with_config(connector, config.client);
    manager
        .connect()
        .map_err(|err| client_error("connect failed", err))?;
    debug!(path = %path.display(), "connected");
    Ok(manager)
}

/// Process one round of inbound traffic and timers.
///
/// An open Unix transport blocks for up to its poll interval inside
/// `poll`; while reconnecting there is nothing to block on, so sleep until
/// the next deadline instead.
pub fn pump(manager: &mut ConnectionManager, idle: Duration) {
    let now = Instant::now();
    manager.poll(now);
    if manager.state() != ConnectionState::Open {
        let pause = manager
            .next_deadline()
            .map(|due| due.saturating_duration_since(now))
            .unwrap_or(idle)
            .min(idle);
        thread::sleep(pause);
    }
}

/// Pump until `done` returns true, the timeout passes, the connection
/// closes for good, or `keep_going` turns false.
pub fn run_until(
    manager: &mut ConnectionManager,
    timeout: Option<Duration>,
    idle: Duration,
    mut keep_going: impl FnMut() -> bool,
    mut done: impl FnMut(&ConnectionManager) -> bool,
) -> Wait {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if done(manager) {
            return Wait::Done;
        }
        if manager.state() == ConnectionState::Closed {
            return Wait::Closed;
        }
        if !keep_going() {
            return Wait::Interrupted;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Wait::TimedOut;
        }
        pump(manager, idle);
    }
}
