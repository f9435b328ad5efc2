use std::time::Duration;

use npulink_wire::ProtocolVersion;

use crate::dma::DmaError;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] npulink_transport::TransportError),

    /// Message encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] npulink_wire::WireError),

    /// The device is shutting down and accepts no new messages.
    #[error("device is closing")]
    Closed,

    /// A blocking wait was interrupted.
    #[error("interrupted")]
    Interrupted,

    /// The outgoing buffer stayed full for the whole send timeout.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// No response arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The core subsystem speaks an incompatible protocol version.
    #[error("protocol version mismatch: expected {expected}, core reports {found}")]
    ProtocolVersion {
        expected: ProtocolVersion,
        found: ProtocolVersion,
    },

    /// A response was well-formed on the wire but its content is invalid.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Every transaction id is in use.
    #[error("no transaction ids available")]
    NoIdsAvailable,

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// DMA memory could not be allocated.
    #[error("dma allocation failed: {0}")]
    Dma(#[from] DmaError),

    /// The transaction was failed because the link went down.
    #[error("link to core subsystem is down")]
    LinkDown,

    /// The core subsystem stopped responding; it has been reported as faulted.
    #[error("i/o error: {0}")]
    Io(String),
}

impl EngineError {
    /// Whether this error was escalated to the fault reporter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolVersion { .. } | Self::Io(_))
    }

    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::SendTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
