use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::message::{
    BufferDesc, CancelInferenceRequest, CancelInferenceResponse, CapabilitiesResponse,
    ErrorKind, ErrorReport, InferenceRequest, InferenceResponse, Message, NetworkInfoRequest,
    NetworkInfoResponse, NetworkRef, Payload, ProtocolVersion, RemoteStatus,
};
use crate::msg_type::MessageType;

/// Header magic: "AEv1" read as a little-endian word.
pub const MAGIC: u32 = 0x4145_7631;

/// Header: magic (4) + type (4) + id (8) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Protocol version spoken by this crate.
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 2;
pub const VERSION_PATCH: u8 = 0;

/// Maximum number of input or output buffers per inference.
pub const BUFFER_MAX: usize = 16;

/// Number of PMU event counters.
pub const PMU_MAX: usize = 8;

/// Length of the network description field, terminator included.
pub const DESCRIPTION_LEN: usize = 32;

/// Length of the error report text field, terminator included.
pub const ERROR_TEXT_LEN: usize = 128;

const BUFFER_DESC_SIZE: usize = 8;
const NETWORK_SIZE: usize = 4 + BUFFER_DESC_SIZE;

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw type; may be outside the protocol.
    pub msg_type: u32,
    pub id: u64,
}

impl Header {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u32(self.msg_type)
    }
}

/// Exact payload length for a message type.
pub fn payload_size(msg_type: MessageType) -> usize {
    match msg_type {
        MessageType::Error => 4 + ERROR_TEXT_LEN,
        MessageType::Ping
        | MessageType::Pong
        | MessageType::VersionRequest
        | MessageType::CapabilitiesRequest => 0,
        MessageType::InferenceRequest => {
            2 * (4 + BUFFER_MAX * BUFFER_DESC_SIZE) + NETWORK_SIZE + PMU_MAX + 4
        }
        // 4 bytes of padding align the cycle counter to 8.
        MessageType::InferenceResponse => 4 + BUFFER_MAX * 4 + 4 + PMU_MAX + PMU_MAX * 8 + 4 + 4 + 8,
        MessageType::VersionResponse => 4,
        MessageType::CapabilitiesResponse => 13 * 4,
        MessageType::NetworkInfoRequest => NETWORK_SIZE,
        MessageType::NetworkInfoResponse => DESCRIPTION_LEN + 2 * (4 + BUFFER_MAX * 4) + 4,
        MessageType::CancelInferenceRequest => 8,
        MessageType::CancelInferenceResponse => 4,
    }
}

/// Decode and validate the header at the front of `src`.
///
/// Only the length and the magic are checked; the type is returned raw.
pub fn decode_header(src: &[u8]) -> Result<Header> {
    if src.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            len: src.len(),
            header: HEADER_SIZE,
        });
    }
    let mut buf = src;
    let magic = buf.get_u32_le();
    if magic != MAGIC {
        return Err(WireError::InvalidMagic { found: magic });
    }
    let msg_type = buf.get_u32_le();
    let id = buf.get_u64_le();
    Ok(Header { msg_type, id })
}

/// Decode a complete message.
///
/// The payload length must match the declared type exactly.
pub fn decode_message(src: &[u8]) -> Result<Message> {
    let header = decode_header(src)?;
    let msg_type = header
        .message_type()
        .ok_or(WireError::UnknownType(header.msg_type))?;

    let mut buf = &src[HEADER_SIZE..];
    let expected = payload_size(msg_type);
    if buf.len() != expected {
        return Err(WireError::PayloadSize {
            msg_type,
            size: buf.len(),
            expected,
        });
    }

    let payload = match msg_type {
        MessageType::Error => {
            let kind = ErrorKind::from_u32(buf.get_u32_le());
            let mut text = [0u8; ERROR_TEXT_LEN];
            buf.copy_to_slice(&mut text);
            Payload::Error(ErrorReport { kind, text })
        }
        MessageType::Ping => Payload::Ping,
        MessageType::Pong => Payload::Pong,
        MessageType::InferenceRequest => {
            let ifm = get_buffer_list(&mut buf)?;
            let ofm = get_buffer_list(&mut buf)?;
            let network = get_network(&mut buf)?;
            let mut pmu_event_config = [0u8; PMU_MAX];
            buf.copy_to_slice(&mut pmu_event_config);
            let pmu_cycle_counter_enable = buf.get_u32_le() != 0;
            Payload::InferenceRequest(InferenceRequest {
                ifm,
                ofm,
                network,
                pmu_event_config,
                pmu_cycle_counter_enable,
            })
        }
        MessageType::InferenceResponse => {
            let ofm_count = buf.get_u32_le();
            let mut ofm_size = [0u32; BUFFER_MAX];
            for size in ofm_size.iter_mut() {
                *size = buf.get_u32_le();
            }
            let status = RemoteStatus::from_u32(buf.get_u32_le());
            let mut pmu_event_config = [0u8; PMU_MAX];
            buf.copy_to_slice(&mut pmu_event_config);
            let mut pmu_event_count = [0u64; PMU_MAX];
            for count in pmu_event_count.iter_mut() {
                *count = buf.get_u64_le();
            }
            let pmu_cycle_counter_enable = buf.get_u32_le() != 0;
            buf.advance(4);
            let pmu_cycle_counter_count = buf.get_u64_le();
            Payload::InferenceResponse(InferenceResponse {
                ofm_count,
                ofm_size,
                status,
                pmu_event_config,
                pmu_event_count,
                pmu_cycle_counter_enable,
                pmu_cycle_counter_count,
            })
        }
        MessageType::VersionRequest => Payload::VersionRequest,
        MessageType::VersionResponse => {
            let major = buf.get_u8();
            let minor = buf.get_u8();
            let patch = buf.get_u8();
            Payload::VersionResponse(ProtocolVersion {
                major,
                minor,
                patch,
            })
        }
        MessageType::CapabilitiesRequest => Payload::CapabilitiesRequest,
        MessageType::CapabilitiesResponse => {
            Payload::CapabilitiesResponse(CapabilitiesResponse {
                version_status: buf.get_u32_le(),
                version_minor: buf.get_u32_le(),
                version_major: buf.get_u32_le(),
                product_major: buf.get_u32_le(),
                arch_patch_rev: buf.get_u32_le(),
                arch_minor_rev: buf.get_u32_le(),
                arch_major_rev: buf.get_u32_le(),
                driver_patch_rev: buf.get_u32_le(),
                driver_minor_rev: buf.get_u32_le(),
                driver_major_rev: buf.get_u32_le(),
                macs_per_cc: buf.get_u32_le(),
                cmd_stream_version: buf.get_u32_le(),
                custom_dma: buf.get_u32_le(),
            })
        }
        MessageType::NetworkInfoRequest => Payload::NetworkInfoRequest(NetworkInfoRequest {
            network: get_network(&mut buf)?,
        }),
        MessageType::NetworkInfoResponse => {
            let mut desc = [0u8; DESCRIPTION_LEN];
            buf.copy_to_slice(&mut desc);
            let ifm_count = buf.get_u32_le();
            let mut ifm_size = [0u32; BUFFER_MAX];
            for size in ifm_size.iter_mut() {
                *size = buf.get_u32_le();
            }
            let ofm_count = buf.get_u32_le();
            let mut ofm_size = [0u32; BUFFER_MAX];
            for size in ofm_size.iter_mut() {
                *size = buf.get_u32_le();
            }
            let status = RemoteStatus::from_u32(buf.get_u32_le());
            Payload::NetworkInfoResponse(NetworkInfoResponse {
                desc,
                ifm_count,
                ifm_size,
                ofm_count,
                ofm_size,
                status,
            })
        }
        MessageType::CancelInferenceRequest => {
            Payload::CancelInferenceRequest(CancelInferenceRequest {
                inference_id: buf.get_u64_le(),
            })
        }
        MessageType::CancelInferenceResponse => {
            Payload::CancelInferenceResponse(CancelInferenceResponse {
                status: RemoteStatus::from_u32(buf.get_u32_le()),
            })
        }
    };

    Ok(Message {
        id: header.id,
        payload,
    })
}

/// Encode a message into the wire format, appending to `dst`.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬────────────┬─────────────────────────┐
/// │ Magic (4B) │ Type (4B) │ Id (8B LE) │ Payload (fixed by type) │
/// └────────────┴───────────┴────────────┴─────────────────────────┘
/// ```
pub fn encode_message(msg: &Message, dst: &mut BytesMut) -> Result<()> {
    let msg_type = msg.message_type();
    dst.reserve(HEADER_SIZE + payload_size(msg_type));
    dst.put_u32_le(MAGIC);
    dst.put_u32_le(msg_type.as_u32());
    dst.put_u64_le(msg.id);

    match &msg.payload {
        Payload::Error(report) => {
            dst.put_u32_le(report.kind.as_u32());
            dst.put_slice(&report.text);
        }
        Payload::Ping | Payload::Pong | Payload::VersionRequest | Payload::CapabilitiesRequest => {}
        Payload::InferenceRequest(req) => {
            put_buffer_list(dst, &req.ifm)?;
            put_buffer_list(dst, &req.ofm)?;
            put_network(dst, &req.network);
            dst.put_slice(&req.pmu_event_config);
            dst.put_u32_le(req.pmu_cycle_counter_enable as u32);
        }
        Payload::InferenceResponse(rsp) => {
            dst.put_u32_le(rsp.ofm_count);
            for size in &rsp.ofm_size {
                dst.put_u32_le(*size);
            }
            dst.put_u32_le(rsp.status.as_u32());
            dst.put_slice(&rsp.pmu_event_config);
            for count in &rsp.pmu_event_count {
                dst.put_u64_le(*count);
            }
            dst.put_u32_le(rsp.pmu_cycle_counter_enable as u32);
            dst.put_u32_le(0);
            dst.put_u64_le(rsp.pmu_cycle_counter_count);
        }
        Payload::VersionResponse(version) => {
            dst.put_u8(version.major);
            dst.put_u8(version.minor);
            dst.put_u8(version.patch);
            dst.put_u8(0);
        }
        Payload::CapabilitiesResponse(caps) => {
            for value in [
                caps.version_status,
                caps.version_minor,
                caps.version_major,
                caps.product_major,
                caps.arch_patch_rev,
                caps.arch_minor_rev,
                caps.arch_major_rev,
                caps.driver_patch_rev,
                caps.driver_minor_rev,
                caps.driver_major_rev,
                caps.macs_per_cc,
                caps.cmd_stream_version,
                caps.custom_dma,
            ] {
                dst.put_u32_le(value);
            }
        }
        Payload::NetworkInfoRequest(req) => put_network(dst, &req.network),
        Payload::NetworkInfoResponse(rsp) => {
            dst.put_slice(&rsp.desc);
            dst.put_u32_le(rsp.ifm_count);
            for size in &rsp.ifm_size {
                dst.put_u32_le(*size);
            }
            dst.put_u32_le(rsp.ofm_count);
            for size in &rsp.ofm_size {
                dst.put_u32_le(*size);
            }
            dst.put_u32_le(rsp.status.as_u32());
        }
        Payload::CancelInferenceRequest(req) => dst.put_u64_le(req.inference_id),
        Payload::CancelInferenceResponse(rsp) => dst.put_u32_le(rsp.status.as_u32()),
    }
    Ok(())
}

fn put_buffer_list(dst: &mut BytesMut, buffers: &[BufferDesc]) -> Result<()> {
    if buffers.len() > BUFFER_MAX {
        return Err(WireError::TooManyBuffers {
            count: buffers.len(),
            max: BUFFER_MAX,
        });
    }
    dst.put_u32_le(buffers.len() as u32);
    for desc in buffers {
        dst.put_u32_le(desc.ptr);
        dst.put_u32_le(desc.size);
    }
    dst.put_bytes(0, (BUFFER_MAX - buffers.len()) * BUFFER_DESC_SIZE);
    Ok(())
}

fn get_buffer_list(buf: &mut &[u8]) -> Result<Vec<BufferDesc>> {
    let count = buf.get_u32_le() as usize;
    if count > BUFFER_MAX {
        return Err(WireError::TooManyBuffers {
            count,
            max: BUFFER_MAX,
        });
    }
    let mut list = Vec::with_capacity(count);
    for i in 0..BUFFER_MAX {
        let desc = BufferDesc {
            ptr: buf.get_u32_le(),
            size: buf.get_u32_le(),
        };
        if i < count {
            list.push(desc);
        }
    }
    Ok(list)
}

fn put_network(dst: &mut BytesMut, network: &NetworkRef) {
    match network {
        NetworkRef::Buffer(desc) => {
            dst.put_u32_le(NetworkRef::TYPE_BUFFER);
            dst.put_u32_le(desc.ptr);
            dst.put_u32_le(desc.size);
        }
        NetworkRef::Index(index) => {
            dst.put_u32_le(NetworkRef::TYPE_INDEX);
            dst.put_u32_le(*index);
            dst.put_u32_le(0);
        }
    }
}

fn get_network(buf: &mut &[u8]) -> Result<NetworkRef> {
    let kind = buf.get_u32_le();
    let first = buf.get_u32_le();
    let second = buf.get_u32_le();
    match kind {
        NetworkRef::TYPE_BUFFER => Ok(NetworkRef::Buffer(BufferDesc {
            ptr: first,
            size: second,
        })),
        NetworkRef::TYPE_INDEX => Ok(NetworkRef::Index(first)),
        other => Err(WireError::InvalidNetworkType(other)),
    }
}
