use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{InboundHandler, Transport};

/// Default number of outgoing message slots.
pub const DEFAULT_CAPACITY: usize = 8;

/// Default maximum message size: 512 bytes, the size of one rpmsg buffer.
pub const DEFAULT_MAX_MESSAGE: usize = 512;

struct Shared {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    closed: AtomicBool,
    max_message: usize,
}

/// Host side of an in-memory channel.
///
/// Outgoing messages occupy one of a fixed number of slots until the core
/// side receives them, so a slow receiver makes [`Transport::try_send`]
/// report [`TransportError::WouldBlock`].
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Core-subsystem side of an in-memory channel.
pub struct CoreEndpoint {
    shared: Arc<Shared>,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
}

/// Create a connected host/core pair with `capacity` outgoing slots.
pub fn memory_pair(capacity: usize) -> (MemoryTransport, CoreEndpoint) {
    memory_pair_with_max(capacity, DEFAULT_MAX_MESSAGE)
}

/// Create a connected host/core pair with an explicit message size limit.
pub fn memory_pair_with_max(capacity: usize, max_message: usize) -> (MemoryTransport, CoreEndpoint) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let shared = Arc::new(Shared {
        tx,
        rx,
        closed: AtomicBool::new(false),
        max_message,
    });
    (
        MemoryTransport {
            shared: Arc::clone(&shared),
        },
        CoreEndpoint {
            shared,
            handler: Mutex::new(None),
        },
    )
}

impl MemoryTransport {
    /// Number of messages waiting to be received by the core side.
    pub fn pending(&self) -> usize {
        self.shared.rx.len()
    }

    /// Returns true once either side closed the channel.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl Transport for MemoryTransport {
    fn try_send(&self, message: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if message.len() > self.shared.max_message {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.shared.max_message,
            });
        }

        match self.shared.tx.try_send(Bytes::copy_from_slice(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::WouldBlock),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }
}

impl CoreEndpoint {
    /// Attach the handler that receives messages sent by [`deliver`](Self::deliver).
    pub fn attach(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.lock() = Some(handler);
    }

    /// Detach the inbound handler.
    pub fn detach(&self) {
        self.handler.lock().take();
    }

    /// Receive the next host message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout. Receiving frees a slot and notifies the
    /// attached handler that the host may send again.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.shared.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.notify_writable();
                Ok(Some(message))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Receive the next host message without waiting.
    pub fn try_recv(&self) -> Option<Bytes> {
        let message = self.shared.rx.try_recv().ok()?;
        self.notify_writable();
        Some(message)
    }

    /// Send a message to the host.
    ///
    /// The attached handler runs on the calling thread.
    pub fn deliver(&self, message: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler.on_message(message);
                Ok(())
            }
            None => {
                debug!(len = message.len(), "no inbound handler attached; dropping");
                Err(TransportError::Closed)
            }
        }
    }

    /// Close the channel. Subsequent sends on either side fail with `Closed`.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("memory transport closed");
        }
    }

    fn notify_writable(&self) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_writable();
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
