/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The outgoing buffer is full. Retry once space is available.
    #[error("transport buffer full")]
    WouldBlock,

    /// The message exceeds what the transport can carry.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// An I/O error occurred on the underlying channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if the failure is transient and the send may be retried.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
