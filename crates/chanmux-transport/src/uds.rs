use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::framing::FramingConfig;
use crate::stream::StreamTransport;
use crate::traits::{Connector, Transport};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Stream configuration for socket-backed transports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// How long `recv` may wait for data before reporting nothing pending.
    pub poll_interval_ms: u64,
    /// Write timeout in milliseconds. `0` disables the timeout.
    pub write_timeout_ms: u64,
    #[serde(flatten)]
    pub framing: FramingConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            write_timeout_ms: 5_000,
            framing: FramingConfig::default(),
        }
    }
}

impl StreamConfig {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

/// Connect a framed message transport over a Unix domain socket.
pub fn connect_unix(
    path: impl AsRef<Path>,
    config: &StreamConfig,
) -> Result<StreamTransport<UnixStream>> {
    let path = path.as_ref();

    let path_bytes = path.as_os_str().len();
    if path_bytes >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: path_bytes,
            max: MAX_PATH_LEN,
        });
    }

    let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
        path: path.to_path_buf(),
        source: e,
    })?;
    stream.set_read_timeout(Some(config.poll_interval()))?;
    stream.set_write_timeout(config.write_timeout())?;
    debug!(?path, "connected to unix domain socket");

    Ok(StreamTransport::with_config(stream, config.framing.clone()))
}

/// Reconnect-capable connector for a Unix socket path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
    config: StreamConfig,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, StreamConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: StreamConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// The socket path this connector dials.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for UnixConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let transport = connect_unix(&self.path, &self.config)?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    use bytes::BytesMut;

    use super::*;
    use crate::framing::{decode_message, encode_message, HEADER_SIZE};

    fn temp_sock(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("chanmux-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock = dir.join("test.sock");
        let _ = std::fs::remove_file(&sock);
        (dir, sock)
    }

    #[test]
    fn connector_exchanges_messages() {
        let (dir, sock_path) = temp_sock("uds-exchange");
        let listener = UnixListener::bind(&sock_path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; HEADER_SIZE + 3];
            stream.read_exact(&mut header).unwrap();
            let mut wire = BytesMut::from(&header[..]);
            let msg = decode_message(&mut wire, 1024).unwrap().unwrap();
            assert_eq!(msg.as_ref(), b"2::");

            let mut reply = BytesMut::new();
            encode_message(b"1::", &mut reply).unwrap();
            stream.write_all(&reply).unwrap();
        });

        let mut connector = UnixConnector::new(&sock_path);
        let mut transport = connector.connect().unwrap();
        transport.send(b"2::").unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(msg) = transport.recv().unwrap() {
                received = Some(msg);
                break;
            }
        }
        assert_eq!(received.unwrap().as_ref(), b"1::");

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let (dir, sock_path) = temp_sock("uds-missing");
        let result = connect_unix(&sock_path, &StreamConfig::default());
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = connect_unix(&long_path, &StreamConfig::default());
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn stream_config_from_json() {
        let cfg: StreamConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 10, "max_message_size": 4096}"#).unwrap();
        assert_eq!(cfg.poll_interval_ms, 10);
        assert_eq!(cfg.write_timeout_ms, 5_000);
        assert_eq!(cfg.framing.max_message_size, 4096);
    }
}
