//! Message type identifiers.
//!
//! Requests and their responses use adjacent values. Types 1-3 are
//! uncorrelated housekeeping messages.

use std::fmt;

/// Message type carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Fatal error reported by the core subsystem.
    Error = 1,
    Ping = 2,
    Pong = 3,
    InferenceRequest = 4,
    InferenceResponse = 5,
    VersionRequest = 6,
    VersionResponse = 7,
    CapabilitiesRequest = 8,
    CapabilitiesResponse = 9,
    NetworkInfoRequest = 10,
    NetworkInfoResponse = 11,
    CancelInferenceRequest = 12,
    CancelInferenceResponse = 13,
}

impl MessageType {
    /// Decode a raw header type.
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Error,
            2 => Self::Ping,
            3 => Self::Pong,
            4 => Self::InferenceRequest,
            5 => Self::InferenceResponse,
            6 => Self::VersionRequest,
            7 => Self::VersionResponse,
            8 => Self::CapabilitiesRequest,
            9 => Self::CapabilitiesResponse,
            10 => Self::NetworkInfoRequest,
            11 => Self::NetworkInfoResponse,
            12 => Self::CancelInferenceRequest,
            13 => Self::CancelInferenceResponse,
            _ => return None,
        })
    }

    /// Raw header value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::InferenceRequest => "inference request",
            Self::InferenceResponse => "inference response",
            Self::VersionRequest => "protocol version request",
            Self::VersionResponse => "protocol version response",
            Self::CapabilitiesRequest => "capabilities request",
            Self::CapabilitiesResponse => "capabilities response",
            Self::NetworkInfoRequest => "network info request",
            Self::NetworkInfoResponse => "network info response",
            Self::CancelInferenceRequest => "cancel inference request",
            Self::CancelInferenceResponse => "cancel inference response",
        }
    }

    /// The request type a response answers, used to correlate transactions.
    pub fn request_for(self) -> Option<Self> {
        match self {
            Self::InferenceResponse => Some(Self::InferenceRequest),
            Self::VersionResponse => Some(Self::VersionRequest),
            Self::CapabilitiesResponse => Some(Self::CapabilitiesRequest),
            Self::NetworkInfoResponse => Some(Self::NetworkInfoRequest),
            Self::CancelInferenceResponse => Some(Self::CancelInferenceRequest),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
