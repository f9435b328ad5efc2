//! Cancellation of in-flight inferences.

use std::sync::Arc;

use npulink_wire::{CancelInferenceRequest, Message, MessageType, Payload, RemoteStatus};
use parking_lot::MutexGuard;
use serde::Serialize;
use tracing::{debug, warn};

use crate::completion::{oneshot, Waited};
use crate::device::{DeviceShared, Pending};
use crate::error::{EngineError, Result};
use crate::inference::{Inference, InferenceCore, InferenceStatus};
use crate::registry::TransactionId;

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelStatus {
    /// The core subsystem aborted the inference.
    Ok,
    /// Nothing was cancelled: the inference had already finished, or the
    /// core subsystem refused.
    Error,
}

impl std::fmt::Display for CancelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "Ok",
            Self::Error => "Error",
        })
    }
}

impl Inference {
    /// Ask the core subsystem to abort this inference.
    ///
    /// The inference is marked `Aborting` before the request goes out, so a
    /// normal response racing the cancel still ends as `Aborted`. A lost
    /// cancel response or a dropped link is escalated as a fatal fault.
    pub fn cancel(&self) -> Result<CancelStatus> {
        let device = self.device().ok_or(EngineError::Closed)?;
        device.cancel_inference(self.id(), self.core())
    }
}

enum CancelOutcome {
    Done(Result<CancelStatus>),
    Fatal(&'static str),
}

impl DeviceShared {
    fn cancel_inference(
        &self,
        target: TransactionId,
        core: &Arc<InferenceCore>,
    ) -> Result<CancelStatus> {
        let mut state = self.state.lock();
        if core.is_done() {
            debug!(target, status = %core.status(), "cancel of finished inference");
            return Ok(CancelStatus::Error);
        }

        let inference = Arc::clone(core);
        inference.set_status(InferenceStatus::Aborting);

        let (completer, completion) = oneshot();
        let id = self.register(
            &mut state,
            MessageType::CancelInferenceRequest,
            Pending::Request(completer),
        )?;
        debug!(id, target, "cancel created");

        let request = Payload::CancelInferenceRequest(CancelInferenceRequest {
            inference_id: target,
        });
        if let Err(e) = self.send_message(&mut state, &Message::new(id, request)) {
            let entry = state.registry.deregister(id);
            drop(state);
            drop(entry);
            warn!(id, target, error = %e, "failed to send cancel");
            return Err(e);
        }

        let timeout = self.config.cancel_timeout;
        let waited = MutexGuard::unlocked(&mut state, || completion.wait(timeout));

        let outcome = match waited {
            Waited::Done(Ok(Payload::CancelInferenceResponse(rsp))) => {
                if rsp.status == RemoteStatus::Ok {
                    if inference.status() != InferenceStatus::Aborted {
                        inference.set_status(InferenceStatus::Aborted);
                    }
                    CancelOutcome::Done(Ok(CancelStatus::Ok))
                } else {
                    debug!(id, target, status = ?rsp.status, "cancel refused");
                    CancelOutcome::Done(Ok(CancelStatus::Error))
                }
            }
            Waited::Done(Ok(other)) => CancelOutcome::Done(Err(EngineError::Malformed(format!(
                "expected cancel response, got {}",
                other.message_type()
            )))),
            Waited::Done(Err(EngineError::LinkDown)) | Waited::Abandoned => {
                CancelOutcome::Fatal("link down during cancel")
            }
            Waited::Done(Err(e)) => CancelOutcome::Done(Err(e)),
            Waited::TimedOut => {
                warn!(id, target, ?timeout, "cancel response timeout");
                CancelOutcome::Fatal("cancel response lost")
            }
        };

        let entry = state.registry.deregister(id);
        drop(state);
        drop(entry);
        drop(inference);

        match outcome {
            CancelOutcome::Done(result) => result,
            CancelOutcome::Fatal(reason) => {
                self.report_fault(reason);
                Err(EngineError::Io(reason.to_string()))
            }
        }
    }
}
