use serde::Serialize;

use crate::codec::{BUFFER_MAX, DESCRIPTION_LEN, ERROR_TEXT_LEN, PMU_MAX};
use crate::error::{Result, WireError};
use crate::msg_type::MessageType;

/// Status codes reported by the core subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Ok,
    Error,
    Running,
    Rejected,
    Aborted,
    Aborting,
    /// A value outside the protocol, kept for diagnostics.
    Unknown(u32),
}

impl RemoteStatus {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Running,
            3 => Self::Rejected,
            4 => Self::Aborted,
            5 => Self::Aborting,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::Running => 2,
            Self::Rejected => 3,
            Self::Aborted => 4,
            Self::Aborting => 5,
            Self::Unknown(raw) => raw,
        }
    }
}

/// A buffer in the core subsystem's address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferDesc {
    pub ptr: u32,
    pub size: u32,
}

/// How the core subsystem locates a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRef {
    /// Model data uploaded by the host.
    Buffer(BufferDesc),
    /// A model built into the core subsystem's catalog.
    Index(u32),
}

impl NetworkRef {
    pub(crate) const TYPE_BUFFER: u32 = 1;
    pub(crate) const TYPE_INDEX: u32 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub ifm: Vec<BufferDesc>,
    pub ofm: Vec<BufferDesc>,
    pub network: NetworkRef,
    pub pmu_event_config: [u8; PMU_MAX],
    pub pmu_cycle_counter_enable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResponse {
    /// Raw output count; validated by the receiver.
    pub ofm_count: u32,
    pub ofm_size: [u32; BUFFER_MAX],
    pub status: RemoteStatus,
    pub pmu_event_config: [u8; PMU_MAX],
    pub pmu_event_count: [u64; PMU_MAX],
    pub pmu_cycle_counter_enable: bool,
    pub pmu_cycle_counter_count: u64,
}

impl InferenceResponse {
    /// An empty response carrying only a status.
    pub fn with_status(status: RemoteStatus) -> Self {
        Self {
            ofm_count: 0,
            ofm_size: [0; BUFFER_MAX],
            status,
            pmu_event_config: [0; PMU_MAX],
            pmu_event_count: [0; PMU_MAX],
            pmu_cycle_counter_enable: false,
            pmu_cycle_counter_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfoRequest {
    pub network: NetworkRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfoResponse {
    /// NUL-terminated ASCII description.
    pub desc: [u8; DESCRIPTION_LEN],
    pub ifm_count: u32,
    pub ifm_size: [u32; BUFFER_MAX],
    pub ofm_count: u32,
    pub ofm_size: [u32; BUFFER_MAX],
    pub status: RemoteStatus,
}

impl NetworkInfoResponse {
    /// The description up to its NUL terminator.
    ///
    /// Fails if the field is not terminated within its 32 bytes.
    pub fn description(&self) -> Result<String> {
        let end = self
            .desc
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::Unterminated {
                field: "network description",
            })?;
        Ok(String::from_utf8_lossy(&self.desc[..end]).into_owned())
    }

    /// Copy `text` into a description field, truncating to leave room for NUL.
    pub fn encode_description(text: &str) -> [u8; DESCRIPTION_LEN] {
        let mut desc = [0u8; DESCRIPTION_LEN];
        let len = text.len().min(DESCRIPTION_LEN - 1);
        desc[..len].copy_from_slice(&text.as_bytes()[..len]);
        desc
    }
}

/// Protocol version announced by the core subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Hardware identification and configuration of the NPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitiesResponse {
    pub version_status: u32,
    pub version_minor: u32,
    pub version_major: u32,
    pub product_major: u32,
    pub arch_patch_rev: u32,
    pub arch_minor_rev: u32,
    pub arch_major_rev: u32,
    pub driver_patch_rev: u32,
    pub driver_minor_rev: u32,
    pub driver_major_rev: u32,
    pub macs_per_cc: u32,
    pub cmd_stream_version: u32,
    pub custom_dma: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelInferenceRequest {
    /// Transaction id of the inference to cancel.
    pub inference_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelInferenceResponse {
    pub status: RemoteStatus,
}

/// Error classes in an error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Generic,
    UnsupportedType,
    InvalidPayload,
    InvalidSize,
    InvalidMagic,
    Other(u32),
}

impl ErrorKind {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Self::Generic,
            1 => Self::UnsupportedType,
            2 => Self::InvalidPayload,
            3 => Self::InvalidSize,
            4 => Self::InvalidMagic,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Generic => 0,
            Self::UnsupportedType => 1,
            Self::InvalidPayload => 2,
            Self::InvalidSize => 3,
            Self::InvalidMagic => 4,
            Self::Other(raw) => raw,
        }
    }
}

/// Fatal error reported by the core subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub text: [u8; ERROR_TEXT_LEN],
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, text: &str) -> Self {
        let mut buf = [0u8; ERROR_TEXT_LEN];
        let len = text.len().min(ERROR_TEXT_LEN - 1);
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self { kind, text: buf }
    }

    /// The report text. The last byte is always treated as a terminator.
    pub fn message(&self) -> String {
        let text = &self.text[..ERROR_TEXT_LEN - 1];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        String::from_utf8_lossy(&text[..end]).into_owned()
    }
}

/// Type-specific message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Error(ErrorReport),
    Ping,
    Pong,
    InferenceRequest(InferenceRequest),
    InferenceResponse(InferenceResponse),
    VersionRequest,
    VersionResponse(ProtocolVersion),
    CapabilitiesRequest,
    CapabilitiesResponse(CapabilitiesResponse),
    NetworkInfoRequest(NetworkInfoRequest),
    NetworkInfoResponse(NetworkInfoResponse),
    CancelInferenceRequest(CancelInferenceRequest),
    CancelInferenceResponse(CancelInferenceResponse),
}

impl Payload {
    /// The header type for this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Error(_) => MessageType::Error,
            Payload::Ping => MessageType::Ping,
            Payload::Pong => MessageType::Pong,
            Payload::InferenceRequest(_) => MessageType::InferenceRequest,
            Payload::InferenceResponse(_) => MessageType::InferenceResponse,
            Payload::VersionRequest => MessageType::VersionRequest,
            Payload::VersionResponse(_) => MessageType::VersionResponse,
            Payload::CapabilitiesRequest => MessageType::CapabilitiesRequest,
            Payload::CapabilitiesResponse(_) => MessageType::CapabilitiesResponse,
            Payload::NetworkInfoRequest(_) => MessageType::NetworkInfoRequest,
            Payload::NetworkInfoResponse(_) => MessageType::NetworkInfoResponse,
            Payload::CancelInferenceRequest(_) => MessageType::CancelInferenceRequest,
            Payload::CancelInferenceResponse(_) => MessageType::CancelInferenceResponse,
        }
    }
}

/// A complete message: transaction id plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub payload: Payload,
}

impl Message {
    pub fn new(id: u64, payload: Payload) -> Self {
        Self { id, payload }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
