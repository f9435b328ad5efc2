use npulink_wire::{CapabilitiesResponse, Payload};
use serde::Serialize;
use tracing::debug;

use crate::device::Device;
use crate::error::{EngineError, Result};

/// Hardware identification of the NPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HardwareId {
    pub version_status: u32,
    pub version_minor: u32,
    pub version_major: u32,
    pub product_major: u32,
    pub arch_patch_rev: u32,
    pub arch_minor_rev: u32,
    pub arch_major_rev: u32,
}

/// Hardware configuration of the NPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HardwareConfig {
    pub macs_per_cc: u32,
    pub cmd_stream_version: u32,
    pub custom_dma: bool,
}

/// Version of the driver running on the core subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub hw_id: HardwareId,
    pub hw_cfg: HardwareConfig,
    pub driver: DriverVersion,
}

impl From<&CapabilitiesResponse> for Capabilities {
    fn from(rsp: &CapabilitiesResponse) -> Self {
        Self {
            hw_id: HardwareId {
                version_status: rsp.version_status,
                version_minor: rsp.version_minor,
                version_major: rsp.version_major,
                product_major: rsp.product_major,
                arch_patch_rev: rsp.arch_patch_rev,
                arch_minor_rev: rsp.arch_minor_rev,
                arch_major_rev: rsp.arch_major_rev,
            },
            hw_cfg: HardwareConfig {
                macs_per_cc: rsp.macs_per_cc,
                cmd_stream_version: rsp.cmd_stream_version,
                custom_dma: rsp.custom_dma != 0,
            },
            driver: DriverVersion {
                major: rsp.driver_major_rev,
                minor: rsp.driver_minor_rev,
                patch: rsp.driver_patch_rev,
            },
        }
    }
}

impl Device {
    /// Capabilities cached by the last successful query, if any.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.shared().state.lock().capabilities
    }

    /// Query the capabilities from the core subsystem and cache them.
    pub fn query_capabilities(&self) -> Result<Capabilities> {
        let shared = self.shared();
        let payload = shared.request(
            Payload::CapabilitiesRequest,
            shared.config.capabilities_timeout,
        )?;
        let Payload::CapabilitiesResponse(rsp) = payload else {
            return Err(EngineError::Malformed(format!(
                "expected capabilities response, got {}",
                payload.message_type()
            )));
        };

        let caps = Capabilities::from(&rsp);
        debug!(
            product_major = caps.hw_id.product_major,
            arch = format_args!(
                "{}.{}.{}",
                caps.hw_id.arch_major_rev, caps.hw_id.arch_minor_rev, caps.hw_id.arch_patch_rev
            ),
            macs_per_cc = caps.hw_cfg.macs_per_cc,
            "capabilities received"
        );
        shared.state.lock().capabilities = Some(caps);
        Ok(caps)
    }
}
