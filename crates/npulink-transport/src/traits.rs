use crate::error::Result;

/// Outgoing half of the host/core channel.
///
/// Implementations deliver discrete messages reliably and in order once
/// `try_send` has returned `Ok`. They must never invoke an
/// [`InboundHandler`] synchronously from inside `try_send`: callers hold the
/// device lock while sending.
pub trait Transport: Send + Sync {
    /// Queue one message without blocking.
    ///
    /// Returns [`TransportError::WouldBlock`](crate::TransportError::WouldBlock)
    /// when the outgoing buffer is full and
    /// [`TransportError::Closed`](crate::TransportError::Closed) once the link
    /// is gone.
    fn try_send(&self, message: &[u8]) -> Result<()>;
}

/// Receiver of messages arriving from the core subsystem.
pub trait InboundHandler: Send + Sync {
    /// Called once per inbound message with its raw bytes.
    fn on_message(&self, message: &[u8]);

    /// Called when outgoing buffer space has been released.
    fn on_writable(&self) {}
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn try_send(&self, message: &[u8]) -> Result<()> {
        (**self).try_send(message)
    }
}
