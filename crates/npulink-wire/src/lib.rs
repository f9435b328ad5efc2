//! Fixed-layout message protocol spoken with the NPU core subsystem.
//!
//! Every message starts with a 16-byte header:
//! - a 4-byte magic number (`0x41457631`)
//! - a 4-byte message type
//! - an 8-byte transaction id
//!
//! followed by a payload whose length is fixed by the message type. A payload
//! of any other length is rejected at decode time.

pub mod codec;
pub mod error;
pub mod message;
pub mod msg_type;

pub use codec::{
    decode_header, decode_message, encode_message, payload_size, Header, BUFFER_MAX,
    DESCRIPTION_LEN, ERROR_TEXT_LEN, HEADER_SIZE, MAGIC, PMU_MAX, VERSION_MAJOR, VERSION_MINOR,
    VERSION_PATCH,
};
pub use error::{Result, WireError};
pub use message::{
    BufferDesc, CancelInferenceRequest, CancelInferenceResponse, CapabilitiesResponse,
    ErrorKind, ErrorReport, InferenceRequest, InferenceResponse, Message, NetworkInfoRequest,
    NetworkInfoResponse, NetworkRef, Payload, ProtocolVersion, RemoteStatus,
};
pub use msg_type::MessageType;
