use bytes::Bytes;

use crate::error::Result;

/// A connected, ordered, message-oriented link.
///
/// Implementations never block for longer than their configured poll
/// interval. `recv` returning `Ok(None)` means nothing is pending yet.
pub trait Transport {
    /// Send one complete message.
    fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Poll for the next complete inbound message.
    ///
    /// Returns `Err(TransportError::Closed)` once the remote side is gone.
    fn recv(&mut self) -> Result<Option<Bytes>>;

    /// Close the link. Calling this more than once is harmless.
    fn close(&mut self);

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }

    fn recv(&mut self) -> Result<Option<Bytes>> {
        (**self).recv()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Produces fresh transports for the initial connection and every reconnect.
pub trait Connector {
    fn connect(&mut self) -> Result<Box<dyn Transport>>;
}

impl<F> Connector for F
where
    F: FnMut() -> Result<Box<dyn Transport>>,
{
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        self()
    }
}
