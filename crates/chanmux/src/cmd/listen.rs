use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanmux_client::{Channel, EventKey, SystemKind};
use tracing::{info, warn};

use crate::cmd::driver::{self, Wait};
use crate::cmd::{load_config, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_event, EventRecord, OutputFormat};

const SYSTEM_KINDS: [SystemKind; 5] = [
    SystemKind::Connect,
    SystemKind::Disconnect,
    SystemKind::Reconnecting,
    SystemKind::Reconnect,
    SystemKind::Error,
];

type Inbox = Rc<RefCell<VecDeque<EventRecord>>>;

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == Some(0) {
        return Err(CliError::usage("--count must be greater than zero"));
    }
    let config = load_config(args.config.as_deref())?;
    let idle = Duration::from_millis(config.stream.poll_interval_ms.max(1));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(err) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!(error = %err, "failed to install Ctrl-C handler");
        }
    }

    let mut manager = driver::connect(&args.path, config)?;
    let inbox: Inbox = Rc::default();
    for path in &args.channels {
        let channel = manager
            .channel(path)
            .map_err(|err| client_error("invalid --channels", err))?;
        subscribe(&channel, &args.events, &inbox);
    }
    info!(channels = ?args.channels, "listening");

    let mut printed = 0usize;
    let outcome = driver::run_until(
        &mut manager,
        None,
        idle,
        || running.load(Ordering::SeqCst),
        |_| {
            let mut inbox = inbox.borrow_mut();
            while let Some(record) = inbox.pop_front() {
                print_event(&record, format);
                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    return true;
                }
            }
            false
        },
    );

    // Drain anything queued by the final poll before the connection closed.
    for record in inbox.borrow_mut().drain(..) {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        print_event(&record, format);
        printed += 1;
    }
    manager.close();

    match outcome {
        Wait::Done | Wait::Interrupted | Wait::TimedOut => Ok(SUCCESS),
        Wait::Closed => Err(CliError::new(TRANSPORT_ERROR, "connection closed by peer")),
    }
}

fn subscribe(channel: &Channel, events: &[String], inbox: &Inbox) {
    let keys: Vec<EventKey> = if events.is_empty() {
        vec![EventKey::Any]
    } else {
        SYSTEM_KINDS
            .into_iter()
            .map(EventKey::from)
            .chain([EventKey::Message])
            .chain(events.iter().map(|name| EventKey::from(name.as_str())))
            .collect()
    };

    for key in keys {
        let inbox = Rc::clone(inbox);
        let endpoint = channel.endpoint().clone();
        channel.on(key, move |event| {
            inbox
                .borrow_mut()
                .push_back(EventRecord::from_event(&endpoint, event));
        });
    }
}
