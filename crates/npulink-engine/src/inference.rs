//! Inference lifecycle.
//!
//! ```text
//! Error (not yet sent) --send ok--> Running
//! Running  --response--> Ok | Rejected | Aborted | Error
//! Running  --cancel----> Aborting
//! Aborting --cancel ok--> Aborted
//! Aborting --response--> Aborted
//! Running | Aborting --teardown--> Error | Aborted
//! ```
//!
//! While running, the registry entry holds an extra reference to the
//! inference, so it survives its user handle until the response (or
//! teardown) arrives. Once `Aborting` or `Aborted`, a late normal response
//! cannot move the status back.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use npulink_wire::{
    InferenceRequest, InferenceResponse, Message, MessageType, Payload, RemoteStatus, BUFFER_MAX,
    PMU_MAX,
};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::device::{Device, DeviceShared, Pending};
use crate::error::{EngineError, Result};
use crate::network::Network;
use crate::registry::TransactionId;

/// Status of an inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InferenceStatus {
    Ok,
    Error,
    Running,
    Rejected,
    Aborted,
    Aborting,
}

impl InferenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Error => "Error",
            Self::Running => "Running",
            Self::Rejected => "Rejected",
            Self::Aborted => "Aborted",
            Self::Aborting => "Aborting",
        }
    }
}

impl std::fmt::Display for InferenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PMU setup requested for an inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmuConfig {
    /// Event id per counter; 0 leaves the counter unused.
    pub events: [u8; PMU_MAX],
    pub cycle_counter: bool,
}

/// Status and PMU counters of an inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferenceResult {
    pub status: InferenceStatus,
    pub pmu_event_config: [u8; PMU_MAX],
    pub pmu_event_count: [u64; PMU_MAX],
    pub pmu_cycle_counter_enable: bool,
    pub pmu_cycle_counter_count: u64,
}

struct InferenceState {
    result: InferenceResult,
    done: bool,
}

pub(crate) struct InferenceCore {
    ifm: Vec<Buffer>,
    ofm: Vec<Buffer>,
    network: Network,
    state: Mutex<InferenceState>,
    done_cv: Condvar,
}

impl InferenceCore {
    fn new(ifm: Vec<Buffer>, ofm: Vec<Buffer>, network: Network, pmu: PmuConfig) -> Self {
        Self {
            ifm,
            ofm,
            network,
            state: Mutex::new(InferenceState {
                result: InferenceResult {
                    status: InferenceStatus::Error,
                    pmu_event_config: pmu.events,
                    pmu_event_count: [0; PMU_MAX],
                    pmu_cycle_counter_enable: pmu.cycle_counter,
                    pmu_cycle_counter_count: 0,
                },
                done: false,
            }),
            done_cv: Condvar::new(),
        }
    }

    pub(crate) fn status(&self) -> InferenceStatus {
        self.state.lock().result.status
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.lock().done
    }

    pub(crate) fn set_status(&self, status: InferenceStatus) {
        self.state.lock().result.status = status;
    }

    /// Apply the core subsystem's response. Marks the inference done.
    pub(crate) fn complete(&self, rsp: &InferenceResponse) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        let result = &mut state.result;
        if matches!(
            result.status,
            InferenceStatus::Aborted | InferenceStatus::Aborting
        ) {
            result.status = InferenceStatus::Aborted;
        } else {
            result.status = match rsp.status {
                RemoteStatus::Ok if rsp.ofm_count as usize <= self.ofm.len() => {
                    InferenceStatus::Ok
                }
                RemoteStatus::Rejected => InferenceStatus::Rejected,
                RemoteStatus::Aborted => InferenceStatus::Aborted,
                _ => InferenceStatus::Error,
            };
            if result.status == InferenceStatus::Ok {
                result.pmu_event_config = rsp.pmu_event_config;
                result.pmu_event_count = rsp.pmu_event_count;
                result.pmu_cycle_counter_enable = rsp.pmu_cycle_counter_enable;
                result.pmu_cycle_counter_count = rsp.pmu_cycle_counter_count;
                debug!(
                    config = ?result.pmu_event_config,
                    count = ?result.pmu_event_count,
                    cycles = result.pmu_cycle_counter_count,
                    "pmu counters"
                );
            }
        }
        state.done = true;
        self.done_cv.notify_all();
    }

    /// The link went down before a response arrived.
    pub(crate) fn fail(&self) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        state.result.status = match state.result.status {
            InferenceStatus::Aborting | InferenceStatus::Aborted => InferenceStatus::Aborted,
            _ => InferenceStatus::Error,
        };
        state.done = true;
        self.done_cv.notify_all();
    }
}

impl Drop for InferenceCore {
    fn drop(&mut self) {
        debug!(
            status = %self.state.get_mut().result.status,
            ifm_count = self.ifm.len(),
            ofm_count = self.ofm.len(),
            "inference destroyed"
        );
    }
}

/// User handle to a submitted inference.
///
/// Dropping the handle does not abort the inference; its resources stay
/// alive until the core subsystem answers or the device is torn down.
pub struct Inference {
    id: TransactionId,
    core: Arc<InferenceCore>,
    device: Weak<DeviceShared>,
}

impl Inference {
    /// Transaction id the inference was submitted under.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Current status and PMU counters without blocking.
    pub fn status(&self) -> InferenceResult {
        self.core.state.lock().result
    }

    /// Whether the inference has reached its final state.
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Block until the inference is done or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<InferenceResult> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.core.state.lock();
        while !state.done {
            match deadline {
                Some(deadline) => {
                    if self.core.done_cv.wait_until(&mut state, deadline).timed_out()
                        && !state.done
                    {
                        return Err(EngineError::Timeout(timeout));
                    }
                }
                None => self.core.done_cv.wait(&mut state),
            }
        }
        Ok(state.result)
    }

    pub fn network(&self) -> &Network {
        &self.core.network
    }

    pub fn ifm(&self) -> &[Buffer] {
        &self.core.ifm
    }

    pub fn ofm(&self) -> &[Buffer] {
        &self.core.ofm
    }

    pub(crate) fn core(&self) -> &Arc<InferenceCore> {
        &self.core
    }

    pub(crate) fn device(&self) -> Option<Arc<DeviceShared>> {
        self.device.upgrade()
    }
}

impl std::fmt::Debug for Inference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Inference")
            .field("id", &self.id)
            .field("status", &state.result.status)
            .field("done", &state.done)
            .finish()
    }
}

impl Device {
    /// Submit an inference of `network` over the given input and output
    /// buffers.
    ///
    /// The inference holds references to every buffer and to the network
    /// until it is destroyed. Returns once the request has been sent; use
    /// [`Inference::wait`] or [`Inference::status`] to observe the result.
    pub fn create_inference(
        &self,
        network: &Network,
        ifm: &[Buffer],
        ofm: &[Buffer],
        pmu: PmuConfig,
    ) -> Result<Inference> {
        if ifm.len() > BUFFER_MAX || ofm.len() > BUFFER_MAX {
            return Err(EngineError::InvalidArgument(format!(
                "too many buffers (ifm {}, ofm {}, max {BUFFER_MAX})",
                ifm.len(),
                ofm.len()
            )));
        }
        let request = InferenceRequest {
            ifm: ifm.iter().map(Buffer::desc).collect::<Result<_>>()?,
            ofm: ofm.iter().map(Buffer::desc).collect::<Result<_>>()?,
            network: network.network_ref(),
            pmu_event_config: pmu.events,
            pmu_cycle_counter_enable: pmu.cycle_counter,
        };
        let core = Arc::new(InferenceCore::new(
            ifm.to_vec(),
            ofm.to_vec(),
            network.clone(),
            pmu,
        ));

        let shared = self.shared();
        let mut state = shared.state.lock();
        let id = shared.register(
            &mut state,
            MessageType::InferenceRequest,
            Pending::Inference(Arc::clone(&core)),
        )?;

        let message = Message::new(id, Payload::InferenceRequest(request));
        if let Err(e) = shared.send_message(&mut state, &message) {
            let entry = state.registry.deregister(id);
            drop(state);
            drop(entry);
            warn!(id, error = %e, "failed to send inference");
            return Err(e);
        }
        core.set_status(InferenceStatus::Running);
        drop(state);

        debug!(
            id,
            ifm_count = ifm.len(),
            ofm_count = ofm.len(),
            "inference created"
        );
        Ok(Inference {
            id,
            core,
            device: Arc::downgrade(shared),
        })
    }
}
