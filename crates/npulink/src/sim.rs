//! In-process stand-in for the NPU core subsystem.
//!
//! Answers the host on its own thread over the core side of a
//! [`MemoryTransport`](npulink_transport::MemoryTransport). Inferences
//! complete after a fixed latency unless cancelled first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use npulink_transport::CoreEndpoint;
use npulink_wire::{
    decode_message, encode_message, CancelInferenceResponse, CapabilitiesResponse, ErrorKind,
    ErrorReport, InferenceRequest, InferenceResponse, Message, NetworkInfoResponse, NetworkRef,
    Payload, ProtocolVersion, RemoteStatus, BUFFER_MAX, PMU_MAX,
};
use tracing::{debug, trace, warn};

use crate::exit::{CliError, CliResult, INTERNAL};

const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time from receiving an inference to answering it.
    pub latency: Duration,
    pub product_major: u32,
    /// Protocol version the simulated core announces.
    pub version: ProtocolVersion,
    /// Answer every inference with `Rejected`.
    pub reject: bool,
}

pub struct Simulator {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Simulator {
    pub fn start(endpoint: CoreEndpoint, config: SimConfig) -> CliResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let core = SimCore {
            endpoint,
            config,
            running: Vec::new(),
        };
        let thread = {
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("npu-sim".to_string())
                .spawn(move || core.run(&stop))
                .map_err(|e| CliError::new(INTERNAL, format!("failed to start simulator: {e}")))?
        };
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Running {
    id: u64,
    /// `None` when the latency does not fit an `Instant`; such an inference
    /// only ends by cancel.
    due: Option<Instant>,
    request: InferenceRequest,
}

struct SimCore {
    endpoint: CoreEndpoint,
    config: SimConfig,
    running: Vec<Running>,
}

impl SimCore {
    fn run(mut self, stop: &AtomicBool) {
        debug!(latency = ?self.config.latency, "simulator started");
        while !stop.load(Ordering::Acquire) {
            match self.endpoint.recv_timeout(self.next_wait()) {
                Ok(Some(raw)) => self.handle(&raw),
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "simulator link closed");
                    break;
                }
            }
            self.finish_due();
        }
        debug!(abandoned = self.running.len(), "simulator stopped");
    }

    fn next_wait(&self) -> Duration {
        let now = Instant::now();
        self.running
            .iter()
            .filter_map(|r| r.due)
            .map(|due| due.saturating_duration_since(now))
            .min()
            .map_or(IDLE_POLL, |due| due.min(IDLE_POLL))
    }

    fn handle(&mut self, raw: &[u8]) {
        let message = match decode_message(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "simulator received malformed message");
                let report = ErrorReport::new(ErrorKind::InvalidPayload, &e.to_string());
                self.send(Message::new(0, Payload::Error(report)));
                return;
            }
        };
        trace!(id = message.id, msg_type = %message.message_type(), "simulator received");

        let id = message.id;
        let reply = match message.payload {
            Payload::Ping => Some(Payload::Pong),
            Payload::Pong => None,
            Payload::VersionRequest => Some(Payload::VersionResponse(self.config.version)),
            Payload::CapabilitiesRequest => {
                Some(Payload::CapabilitiesResponse(self.capabilities()))
            }
            Payload::NetworkInfoRequest(req) => {
                Some(Payload::NetworkInfoResponse(network_info(&req.network)))
            }
            Payload::InferenceRequest(request) => {
                self.running.push(Running {
                    id,
                    due: Instant::now().checked_add(self.config.latency),
                    request,
                });
                None
            }
            Payload::CancelInferenceRequest(req) => {
                Some(Payload::CancelInferenceResponse(self.cancel(req.inference_id)))
            }
            other => {
                let text = format!("unexpected {}", other.message_type());
                Some(Payload::Error(ErrorReport::new(
                    ErrorKind::UnsupportedType,
                    &text,
                )))
            }
        };
        if let Some(payload) = reply {
            self.send(Message::new(id, payload));
        }
    }

    fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            version_status: 1,
            version_minor: 0,
            version_major: 1,
            product_major: self.config.product_major,
            arch_patch_rev: 0,
            arch_minor_rev: 1,
            arch_major_rev: 1,
            driver_patch_rev: 0,
            driver_minor_rev: 8,
            driver_major_rev: 0,
            macs_per_cc: 8,
            cmd_stream_version: 0,
            custom_dma: 0,
        }
    }

    /// Abort a running inference. Its response goes out before the cancel
    /// response.
    fn cancel(&mut self, inference_id: u64) -> CancelInferenceResponse {
        let Some(index) = self.running.iter().position(|r| r.id == inference_id) else {
            debug!(inference_id, "cancel for unknown inference");
            return CancelInferenceResponse {
                status: RemoteStatus::Error,
            };
        };
        let running = self.running.swap_remove(index);
        self.send(Message::new(
            running.id,
            Payload::InferenceResponse(InferenceResponse::with_status(RemoteStatus::Aborted)),
        ));
        CancelInferenceResponse {
            status: RemoteStatus::Ok,
        }
    }

    fn finish_due(&mut self) {
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) =
            self.running.drain(..).partition(|r| r.due.is_some_and(|due| due <= now));
        self.running = pending;
        for running in due {
            let response = self.complete(&running.request);
            self.send(Message::new(running.id, Payload::InferenceResponse(response)));
        }
    }

    fn complete(&self, request: &InferenceRequest) -> InferenceResponse {
        if self.config.reject {
            return InferenceResponse::with_status(RemoteStatus::Rejected);
        }
        let mut rsp = InferenceResponse::with_status(RemoteStatus::Ok);
        rsp.ofm_count = request.ofm.len().min(BUFFER_MAX) as u32;
        for (size, ofm) in rsp.ofm_size.iter_mut().zip(&request.ofm) {
            *size = ofm.size;
        }
        rsp.pmu_event_config = request.pmu_event_config;
        for i in 0..PMU_MAX {
            let event = u64::from(request.pmu_event_config[i]);
            rsp.pmu_event_count[i] = event * 1000 + i as u64;
        }
        rsp.pmu_cycle_counter_enable = request.pmu_cycle_counter_enable;
        if request.pmu_cycle_counter_enable {
            // One cycle per nanosecond of simulated latency.
            rsp.pmu_cycle_counter_count = self.config.latency.as_nanos() as u64;
        }
        rsp
    }

    fn send(&self, message: Message) {
        let mut buf = BytesMut::new();
        if let Err(e) = encode_message(&message, &mut buf) {
            warn!(error = %e, "simulator failed to encode reply");
            return;
        }
        if let Err(e) = self.endpoint.deliver(&buf) {
            debug!(error = %e, "simulator reply dropped");
        }
    }
}

fn network_info(network: &NetworkRef) -> NetworkInfoResponse {
    let (desc, ifm, ofm) = match network {
        NetworkRef::Index(index) => (format!("sim-net-{index}"), 224 * 224 * 3, 1001),
        NetworkRef::Buffer(buffer) => (format!("sim-net@{:#010x}", buffer.ptr), buffer.size, 16),
    };
    let mut ifm_size = [0; BUFFER_MAX];
    ifm_size[0] = ifm;
    let mut ofm_size = [0; BUFFER_MAX];
    ofm_size[0] = ofm;
    NetworkInfoResponse {
        desc: NetworkInfoResponse::encode_description(&desc),
        ifm_count: 1,
        ifm_size,
        ofm_count: 1,
        ofm_size,
        status: RemoteStatus::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_network_description() {
        let info = network_info(&NetworkRef::Index(3));
        assert_eq!(info.description().unwrap(), "sim-net-3");
        assert_eq!(info.ifm_size[0], 224 * 224 * 3);
    }
}
