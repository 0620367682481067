#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use chanmux_client::{Channel, ClientConfig, ConnectionManager, Event, EventKey};
use chanmux_transport::{MemoryConnector, RemoteEnd};

pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: MemoryConnector,
    pub remote: RemoteEnd,
}

impl Harness {
    /// Open a connection and complete the root handshake.
    pub fn connected(config: ClientConfig) -> Self {
        let connector = MemoryConnector::new();
        let mut manager = ConnectionManager::with_config(connector.clone(), config);
        manager.connect().unwrap();
        let remote = connector.latest().unwrap();
        remote.push("1::");
        manager.poll(Instant::now());
        Self {
            manager,
            connector,
            remote,
        }
    }

    /// Join `path`, acknowledging the join from the remote side.
    pub fn joined(&mut self, path: &str) -> Channel {
        let channel = self.manager.channel(path).unwrap();
        self.remote.push(format!("1::{path}"));
        self.pump();
        self.remote.take_sent_text();
        channel
    }

    pub fn push(&mut self, frame: &str) {
        self.remote.push(frame);
        self.pump();
    }

    pub fn pump(&mut self) -> usize {
        self.manager.poll(Instant::now())
    }

    pub fn sent(&self) -> Vec<String> {
        self.remote.take_sent_text()
    }

    /// Pick up the remote end of the newest connection.
    pub fn refresh_remote(&mut self) {
        self.remote = self.connector.latest().unwrap();
    }
}

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Record every delivery for `key` on `channel` as `"<tag>:<summary>"`.
pub fn record(channel: &Channel, key: impl Into<EventKey>, tag: &str, log: &Log) {
    let log = Rc::clone(log);
    let tag = tag.to_string();
    channel.on(key, move |event: &Event| {
        log.borrow_mut().push(format!("{tag}:{}", summary(event)));
    });
}

pub fn summary(event: &Event) -> String {
    match event {
        Event::System(system) => format!("{system:?}"),
        Event::Message { payload, .. } => format!("{payload:?}"),
        Event::App { name, args, .. } => {
            format!("{name}{}", serde_json::Value::Array(args.clone()))
        }
    }
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}
