use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::framing::{decode_message, encode_message, FramingConfig};
use crate::traits::Transport;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Message transport over any `Read + Write` byte stream.
///
/// Handles partial reads internally; `recv` only ever yields complete
/// messages. A read timeout or `WouldBlock` on the stream surfaces as
/// `Ok(None)`, so the stream's timeout doubles as the host loop's poll
/// interval.
///
/// Writes never spin: when the stream would block, the unsent tail stays
/// queued and the next `send`, `recv` or `close` resumes it in order.
pub struct StreamTransport<S> {
    inner: S,
    read_buf: BytesMut,
    /// Framed bytes not yet accepted by the stream.
    write_buf: BytesMut,
    config: FramingConfig,
    closed: bool,
}

impl<S: Read + Write> StreamTransport<S> {
    /// Create a transport with default framing configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, FramingConfig::default())
    }

    /// Create a transport with explicit framing configuration.
    pub fn with_config(inner: S, config: FramingConfig) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            write_buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            closed: false,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consume the transport and return the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Bytes queued behind a write that would have blocked.
    pub fn pending_bytes(&self) -> usize {
        self.write_buf.len()
    }

    /// Write as much of the queued output as the stream accepts.
    ///
    /// Returns `Ok(false)` if the stream would block with bytes still queued.
    fn write_pending(&mut self) -> Result<bool> {
        while !self.write_buf.is_empty() {
            match self.inner.write(&self.write_buf) {
                Ok(0) => return Err(TransportError::Closed("write returned zero".to_string())),
                Ok(n) => self.write_buf.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    debug!(pending = self.write_buf.len(), "write would block, keeping tail");
                    return Ok(false);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(true)
    }

    fn flush(&mut self) -> Result<()> {
        if !self.write_pending()? {
            return Ok(());
        }
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // Retried with the next write.
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed("transport already closed".to_string()));
        }
        if message.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.config.max_message_size,
            });
        }

        encode_message(message, &mut self.write_buf)?;
        self.flush()
    }

    fn recv(&mut self) -> Result<Option<Bytes>> {
        if !self.closed && !self.write_buf.is_empty() {
            self.flush()?;
        }
        loop {
            if let Some(message) = decode_message(&mut self.read_buf, self.config.max_message_size)? {
                return Ok(Some(message));
            }
            if self.closed {
                return Err(TransportError::Closed("transport already closed".to_string()));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                self.closed = true;
                let reason = if self.read_buf.is_empty() {
                    "end of stream"
                } else {
                    "end of stream (incomplete message)"
                };
                return Err(TransportError::Closed(reason.to_string()));
            }

            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("closing stream transport");
            self.closed = true;
            let _ = self.flush();
        }
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Reads from a fixed script of chunks, then reports `WouldBlock` or EOF.
    ///
    /// Each scripted write limit caps one `write` call (`None` blocks); once
    /// the limits run out every write is accepted whole.
    struct Scripted {
        chunks: Vec<std::io::Result<Vec<u8>>>,
        write_limits: Vec<Option<usize>>,
        written: Vec<u8>,
        eof_when_drained: bool,
    }

    impl Scripted {
        fn new(chunks: Vec<std::io::Result<Vec<u8>>>, eof_when_drained: bool) -> Self {
            Self {
                chunks,
                write_limits: Vec::new(),
                written: Vec::new(),
                eof_when_drained,
            }
        }

        fn with_write_limits(mut self, limits: Vec<Option<usize>>) -> Self {
            self.write_limits = limits;
            self
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks.is_empty() {
                if self.eof_when_drained {
                    return Ok(0);
                }
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let chunk = self.chunks.remove(0)?;
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let accepted = match self.write_limits.first().copied() {
                None => buf.len(),
                Some(limit) => {
                    self.write_limits.remove(0);
                    match limit {
                        Some(limit) => limit.min(buf.len()),
                        None => return Err(std::io::Error::from(ErrorKind::WouldBlock)),
                    }
                }
            };
            self.written.extend_from_slice(&buf[..accepted]);
            Ok(accepted)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framed(message: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_message(message, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn send_writes_framed_message() {
        let mut transport = StreamTransport::new(Cursor::new(Vec::<u8>::new()));
        transport.send(b"2::").unwrap();

        let mut wire = BytesMut::from(transport.into_inner().into_inner().as_slice());
        let msg = decode_message(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(msg.as_ref(), b"2::");
    }

    #[test]
    fn blocked_write_keeps_tail_until_next_recv() {
        let wire = framed(b"3:::hello");
        let stream = Scripted::new(Vec::new(), false).with_write_limits(vec![Some(3), None]);
        let mut transport = StreamTransport::new(stream);

        transport.send(b"3:::hello").unwrap();
        assert_eq!(transport.pending_bytes(), wire.len() - 3);
        assert_eq!(transport.get_ref().written, wire[..3].to_vec());

        assert!(transport.recv().unwrap().is_none());
        assert_eq!(transport.pending_bytes(), 0);
        assert_eq!(transport.get_ref().written, wire);
    }

    #[test]
    fn blocked_tail_is_written_before_next_message() {
        let stream = Scripted::new(Vec::new(), false).with_write_limits(vec![None]);
        let mut transport = StreamTransport::new(stream);

        transport.send(b"1::/chat").unwrap();
        assert_eq!(transport.pending_bytes(), framed(b"1::/chat").len());
        transport.send(b"3::/chat:hi").unwrap();

        let mut expected = framed(b"1::/chat");
        expected.extend(framed(b"3::/chat:hi"));
        assert_eq!(transport.pending_bytes(), 0);
        assert_eq!(transport.get_ref().written, expected);
    }

    #[test]
    fn recv_reassembles_split_message() {
        let wire = framed(b"3:::hello");
        let (head, tail) = wire.split_at(4);
        let stream = Scripted::new(vec![Ok(head.to_vec()), Ok(tail.to_vec())], false);
        let mut transport = StreamTransport::new(stream);

        let msg = transport.recv().unwrap().unwrap();
        assert_eq!(msg.as_ref(), b"3:::hello");
        assert!(transport.recv().unwrap().is_none());
    }

    #[test]
    fn would_block_is_not_an_error() {
        let stream = Scripted::new(Vec::new(), false);
        let mut transport = StreamTransport::new(stream);
        assert!(transport.recv().unwrap().is_none());
    }

    #[test]
    fn timed_out_is_not_an_error() {
        let stream = Scripted::new(vec![Err(std::io::Error::from(ErrorKind::TimedOut))], false);
        let mut transport = StreamTransport::new(stream);
        assert!(transport.recv().unwrap().is_none());
    }

    #[test]
    fn interrupted_read_retries() {
        let stream = Scripted::new(
            vec![
                Err(std::io::Error::from(ErrorKind::Interrupted)),
                Ok(framed(b"8::")),
            ],
            false,
        );
        let mut transport = StreamTransport::new(stream);
        assert_eq!(transport.recv().unwrap().unwrap().as_ref(), b"8::");
    }

    #[test]
    fn eof_reports_closed() {
        let stream = Scripted::new(Vec::new(), true);
        let mut transport = StreamTransport::new(stream);
        let err = transport.recv().unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn buffered_messages_drain_after_eof() {
        let mut wire = framed(b"1::");
        wire.extend(framed(b"1::/chat"));
        let stream = Scripted::new(vec![Ok(wire)], true);
        let mut transport = StreamTransport::new(stream);

        assert_eq!(transport.recv().unwrap().unwrap().as_ref(), b"1::");
        assert_eq!(transport.recv().unwrap().unwrap().as_ref(), b"1::/chat");
        assert!(transport.recv().unwrap_err().is_closed());
    }

    #[test]
    fn oversized_send_rejected() {
        let cfg = FramingConfig {
            max_message_size: 4,
        };
        let mut transport = StreamTransport::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = transport.send(b"3:::oversized").unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
    }

    #[test]
    fn send_after_close_fails() {
        let mut transport = StreamTransport::new(Cursor::new(Vec::<u8>::new()));
        transport.close();
        transport.close();
        assert!(transport.send(b"2::").unwrap_err().is_closed());
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        right
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let mut sender = StreamTransport::new(left);
        let mut receiver = StreamTransport::new(right);

        sender.send("5:::{\"name\":\"chat\",\"args\":[\"héllo\"]}".as_bytes()).unwrap();
        let msg = receiver.recv().unwrap().unwrap();
        assert_eq!(
            std::str::from_utf8(&msg).unwrap(),
            "5:::{\"name\":\"chat\",\"args\":[\"héllo\"]}"
        );
    }
}
