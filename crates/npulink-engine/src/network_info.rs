use npulink_wire::{NetworkInfoRequest, Payload, RemoteStatus, BUFFER_MAX};
use serde::Serialize;
use tracing::debug;

use crate::device::Device;
use crate::error::{EngineError, Result};
use crate::network::Network;

/// Description and tensor sizes of a network, as reported by the core
/// subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub description: String,
    pub ifm_sizes: Vec<u32>,
    pub ofm_sizes: Vec<u32>,
}

impl Device {
    /// Ask the core subsystem to describe `network`.
    pub fn network_info(&self, network: &Network) -> Result<NetworkInfo> {
        let shared = self.shared();
        let request = Payload::NetworkInfoRequest(NetworkInfoRequest {
            network: network.network_ref(),
        });
        let payload = shared.request(request, shared.config.network_info_timeout)?;
        let Payload::NetworkInfoResponse(rsp) = payload else {
            return Err(EngineError::Malformed(format!(
                "expected network info response, got {}",
                payload.message_type()
            )));
        };

        if rsp.status != RemoteStatus::Ok {
            return Err(EngineError::Malformed(format!(
                "network info status {:?}",
                rsp.status
            )));
        }
        let (ifm_count, ofm_count) = (rsp.ifm_count as usize, rsp.ofm_count as usize);
        if ifm_count > BUFFER_MAX || ofm_count > BUFFER_MAX {
            return Err(EngineError::Malformed(format!(
                "too many tensors (ifm {ifm_count}, ofm {ofm_count}, max {BUFFER_MAX})"
            )));
        }
        let description = rsp
            .description()
            .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let info = NetworkInfo {
            description,
            ifm_sizes: rsp.ifm_size[..ifm_count].to_vec(),
            ofm_sizes: rsp.ofm_size[..ofm_count].to_vec(),
        };
        debug!(
            description = %info.description,
            ifm_count,
            ofm_count,
            "network info received"
        );
        Ok(info)
    }
}
