use crate::msg_type::MessageType;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The message is shorter than a header.
    #[error("message truncated ({len} bytes, header is {header})")]
    Truncated { len: usize, header: usize },

    /// The header contains an invalid magic number.
    #[error("invalid message magic 0x{found:08x} (expected 0x41457631)")]
    InvalidMagic { found: u32 },

    /// The header carries a message type outside the protocol.
    #[error("unknown message type {0}")]
    UnknownType(u32),

    /// The payload length does not match the declared message type.
    #[error("{msg_type} payload of incorrect size ({size} bytes, expected {expected})")]
    PayloadSize {
        msg_type: MessageType,
        size: usize,
        expected: usize,
    },

    /// More buffer descriptors than the protocol can carry.
    #[error("too many buffers ({count}, max {max})")]
    TooManyBuffers { count: usize, max: usize },

    /// A network reference with an unknown representation tag.
    #[error("invalid network type {0}")]
    InvalidNetworkType(u32),

    /// A fixed-size text field lacks its NUL terminator.
    #[error("{field} is not NUL-terminated")]
    Unterminated { field: &'static str },
}

pub type Result<T> = std::result::Result<T, WireError>;
