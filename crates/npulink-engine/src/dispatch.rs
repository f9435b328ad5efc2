//! Inbound message dispatch.
//!
//! Runs on whatever thread the transport delivers on, concurrently with any
//! number of blocked callers. Malformed, unknown and uncorrelated messages are
//! logged and dropped; they never fail unrelated transactions.

use std::sync::{Arc, Weak};

use npulink_transport::{InboundHandler, TransportError};
use npulink_wire::{decode_header, decode_message, Message, MessageType, Payload, WireError};
use tracing::{debug, error, warn};

use crate::device::{DeviceShared, Pending};
use crate::inference::InferenceCore;
use crate::registry::LookupError;

pub(crate) struct Dispatcher {
    device: Weak<DeviceShared>,
}

impl Dispatcher {
    pub(crate) fn new(device: Weak<DeviceShared>) -> Self {
        Self { device }
    }
}

impl InboundHandler for Dispatcher {
    fn on_message(&self, message: &[u8]) {
        match self.device.upgrade() {
            Some(device) => device.dispatch(message),
            None => debug!(len = message.len(), "device gone; dropping inbound message"),
        }
    }

    fn on_writable(&self) {
        if let Some(device) = self.device.upgrade() {
            device.wake_sender();
        }
    }
}

/// Follow-up work done after the device lock is released.
#[derive(Default)]
struct Deferred {
    released: Option<Arc<InferenceCore>>,
    fault: Option<String>,
    pong: bool,
}

impl DeviceShared {
    pub(crate) fn dispatch(&self, raw: &[u8]) {
        let header = match decode_header(raw) {
            Ok(header) => header,
            Err(e) => {
                warn!(len = raw.len(), error = %e, "dropping inbound message");
                return;
            }
        };

        let mut deferred = Deferred::default();
        match decode_message(raw) {
            Ok(message) => {
                debug!(id = message.id, msg_type = %message.message_type(), "inbound message");
                self.handle(message, &mut deferred);
            }
            Err(WireError::UnknownType(raw_type)) => {
                error!(id = header.id, msg_type = raw_type, "protocol error: unknown message type");
                self.wake_sender();
            }
            Err(e) => {
                warn!(id = header.id, msg_type = header.msg_type, error = %e, "dropping malformed message");
                self.wake_sender();
            }
        }

        drop(deferred.released);
        if let Some(reason) = deferred.fault {
            self.report_fault(&reason);
        }
        if deferred.pong {
            self.send_pong();
        }
    }

    fn handle(&self, message: Message, deferred: &mut Deferred) {
        let id = message.id;
        let mut state = self.state.lock();

        match message.payload {
            Payload::Error(report) => {
                let text = report.message();
                warn!(kind = ?report.kind, text = %text, "core subsystem reported an error");
                deferred.fault = Some(format!("core error report: {text}"));
            }
            Payload::Ping => deferred.pong = true,
            Payload::Pong => debug!("pong received"),
            Payload::InferenceResponse(rsp) => {
                let found = state
                    .registry
                    .find(id, MessageType::InferenceRequest)
                    .map(|_| ());
                match found {
                    Ok(()) => {
                        if let Some(Pending::Inference(core)) = state.registry.deregister(id) {
                            core.complete(&rsp);
                            debug!(id, status = %core.status(), "inference completed");
                            deferred.released = Some(core);
                        }
                    }
                    Err(e) => log_uncorrelated(id, MessageType::InferenceResponse, e),
                }
            }
            payload @ (Payload::VersionResponse(_)
            | Payload::CapabilitiesResponse(_)
            | Payload::NetworkInfoResponse(_)
            | Payload::CancelInferenceResponse(_)) => {
                let msg_type = payload.message_type();
                let Some(request_type) = msg_type.request_for() else {
                    return;
                };
                match state.registry.find(id, request_type) {
                    Ok(Pending::Request(completer)) => {
                        if !completer.complete(Ok(payload)) {
                            debug!(id, %msg_type, "response for completed transaction ignored");
                        }
                    }
                    Ok(Pending::Inference(_)) => log_uncorrelated(
                        id,
                        msg_type,
                        LookupError::TypeMismatch {
                            registered: MessageType::InferenceRequest,
                        },
                    ),
                    Err(e) => log_uncorrelated(id, msg_type, e),
                }
            }
            request @ (Payload::InferenceRequest(_)
            | Payload::VersionRequest
            | Payload::CapabilitiesRequest
            | Payload::NetworkInfoRequest(_)
            | Payload::CancelInferenceRequest(_)) => {
                error!(id, msg_type = %request.message_type(), "protocol error: unexpected request from core");
            }
        }

        if state.send.wake_one() {
            self.send_cv.notify_all();
        }
    }

    fn send_pong(&self) {
        let mut buf = bytes::BytesMut::new();
        if let Err(e) = npulink_wire::encode_message(&Message::new(0, Payload::Pong), &mut buf) {
            warn!(error = %e, "failed to encode pong");
            return;
        }
        match self.transport.try_send(&buf) {
            Ok(()) => debug!("pong sent"),
            Err(TransportError::WouldBlock) => warn!("transport full; pong dropped"),
            Err(e) => warn!(error = %e, "failed to send pong"),
        }
    }
}

fn log_uncorrelated(id: u64, msg_type: MessageType, error: LookupError) {
    match error {
        LookupError::NotFound => warn!(id, %msg_type, "no transaction for response; dropping"),
        LookupError::TypeMismatch { registered } => warn!(
            id,
            %msg_type,
            %registered,
            "response does not match transaction type; dropping"
        ),
    }
}
