//! The device: request/response transactions over one link, and teardown.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use npulink_transport::{InboundHandler, Transport};
use npulink_wire::{encode_message, Message, Payload};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::completion::{oneshot, Completer, Waited};
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::dma::{DmaAllocator, HostDmaAllocator};
use crate::error::{EngineError, Result};
use crate::fault::{FaultReporter, LogFaultReporter};
use crate::inference::InferenceCore;
use crate::registry::{Registry, TransactionId};
use crate::sender::{send_blocking, HasSendQueue, SendQueue};

/// A registered transaction.
pub(crate) enum Pending {
    /// Request waiting for its response payload.
    Request(Completer<Result<Payload>>),
    /// Inference in flight. The entry owns the in-flight reference.
    Inference(Arc<InferenceCore>),
}

/// Everything guarded by the device lock.
pub(crate) struct DeviceState {
    pub(crate) registry: Registry<Pending>,
    pub(crate) send: SendQueue,
    pub(crate) capabilities: Option<Capabilities>,
}

impl HasSendQueue for DeviceState {
    fn send_queue(&mut self) -> &mut SendQueue {
        &mut self.send
    }
}

pub(crate) struct DeviceShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dma: Arc<dyn DmaAllocator>,
    pub(crate) faults: Arc<dyn FaultReporter>,
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) send_cv: Condvar,
}

/// Host-side endpoint of the link to one NPU core subsystem.
///
/// Operations may be called concurrently from any number of threads. Each
/// blocks its caller until the core subsystem answers or a timeout elapses;
/// the device lock is released for the duration of every wait.
///
/// Inbound messages must be fed to the handler returned by
/// [`dispatcher`](Self::dispatcher). Dropping the device tears it down.
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Create a device with heap-backed DMA memory and a logging fault reporter.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self::with_collaborators(
            transport,
            Arc::new(HostDmaAllocator::new()),
            Arc::new(LogFaultReporter),
            config,
        )
    }

    /// Create a device with explicit DMA and fault-reporting collaborators.
    pub fn with_collaborators(
        transport: Arc<dyn Transport>,
        dma: Arc<dyn DmaAllocator>,
        faults: Arc<dyn FaultReporter>,
        config: EngineConfig,
    ) -> Self {
        let state = DeviceState {
            registry: Registry::new(config.max_transactions),
            send: SendQueue::default(),
            capabilities: None,
        };
        Self {
            shared: Arc::new(DeviceShared {
                transport,
                dma,
                faults,
                config,
                state: Mutex::new(state),
                send_cv: Condvar::new(),
            }),
        }
    }

    /// Handler to attach to the transport's inbound side.
    ///
    /// The handler holds only a weak reference; messages arriving after the
    /// device is dropped are ignored.
    pub fn dispatcher(&self) -> Arc<dyn InboundHandler> {
        Arc::new(Dispatcher::new(Arc::downgrade(&self.shared)))
    }

    /// Bring the device up: check the protocol version, then query and cache
    /// the capabilities.
    ///
    /// Failure is reported to the fault reporter.
    pub fn probe(&self) -> Result<Capabilities> {
        let result = self
            .check_version()
            .and_then(|version| {
                debug!(%version, "protocol version accepted");
                self.query_capabilities()
            });
        match &result {
            Ok(caps) => info!(
                product_major = caps.hw_id.product_major,
                macs_per_cc = caps.hw_cfg.macs_per_cc,
                "device probed"
            ),
            Err(EngineError::Closed | EngineError::Interrupted) => {}
            Err(e) if !e.is_fatal() => self.shared.report_fault(&format!("probe failed: {e}")),
            Err(_) => {}
        }
        result
    }

    /// Send a ping. No response is awaited.
    pub fn ping(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared
            .send_message(&mut state, &Message::new(0, Payload::Ping))?;
        debug!("ping sent");
        Ok(())
    }

    /// Unblock every caller currently waiting to send or waiting for a
    /// response. They return [`EngineError::Interrupted`].
    pub fn interrupt(&self) {
        let mut state = self.shared.state.lock();
        state.send.interrupt();
        let mut interrupted = 0usize;
        state.registry.for_each_mut(|_, _, pending| {
            if let Pending::Request(completer) = pending {
                if completer.complete(Err(EngineError::Interrupted)) {
                    interrupted += 1;
                }
            }
        });
        self.shared.send_cv.notify_all();
        debug!(interrupted, "device interrupted");
    }

    /// Stop accepting messages and fail every outstanding transaction.
    ///
    /// Safe to call more than once; later calls find nothing to fail.
    pub fn teardown(&self) {
        self.shared.teardown();
    }

    pub fn is_closing(&self) -> bool {
        self.shared.state.lock().send.is_closing()
    }

    /// Number of registered transactions, in-flight inferences included.
    pub fn pending_transactions(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Number of senders parked waiting for transport space.
    pub fn senders_waiting(&self) -> usize {
        self.shared.state.lock().send.waiting()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    pub(crate) fn dma(&self) -> &Arc<dyn DmaAllocator> {
        &self.shared.dma
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Device")
            .field("registry", &state.registry)
            .field("closing", &state.send.is_closing())
            .field("senders_waiting", &state.send.waiting())
            .finish()
    }
}

impl DeviceShared {
    /// Encode and send `message`, waiting for transport space if needed.
    pub(crate) fn send_message(
        &self,
        state: &mut MutexGuard<'_, DeviceState>,
        message: &Message,
    ) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_message(message, &mut buf)?;
        send_blocking(
            state,
            &self.send_cv,
            &*self.transport,
            &buf,
            self.config.send_timeout,
        )
    }

    /// Register a transaction for `payload`, send it, and wait up to
    /// `timeout` for the response.
    pub(crate) fn request(&self, payload: Payload, timeout: Duration) -> Result<Payload> {
        let msg_type = payload.message_type();
        let (completer, completion) = oneshot();

        let mut state = self.state.lock();
        let id = self.register(&mut state, msg_type, Pending::Request(completer))?;
        debug!(id, %msg_type, "request created");

        if let Err(e) = self.send_message(&mut state, &Message::new(id, payload)) {
            let entry = state.registry.deregister(id);
            drop(state);
            drop(entry);
            return Err(e);
        }

        let waited = MutexGuard::unlocked(&mut state, || completion.wait(timeout));

        let entry = state.registry.deregister(id);
        drop(state);
        drop(entry);

        match waited {
            Waited::Done(result) => result,
            Waited::TimedOut => {
                warn!(id, %msg_type, ?timeout, "response timeout");
                Err(EngineError::Timeout(timeout))
            }
            Waited::Abandoned => Err(EngineError::LinkDown),
        }
    }

    /// Register `pending` under a fresh id, refusing once closing.
    pub(crate) fn register(
        &self,
        state: &mut MutexGuard<'_, DeviceState>,
        msg_type: npulink_wire::MessageType,
        pending: Pending,
    ) -> Result<TransactionId> {
        if state.send.is_closing() {
            return Err(EngineError::Closed);
        }
        state
            .registry
            .register(msg_type, pending)
            .map_err(|_| EngineError::NoIdsAvailable)
    }

    /// Flag one parked sender; the remote may have freed buffer space.
    pub(crate) fn wake_sender(&self) {
        let mut state = self.state.lock();
        if state.send.wake_one() {
            self.send_cv.notify_all();
        }
    }

    pub(crate) fn report_fault(&self, reason: &str) {
        warn!(reason, "reporting fatal fault");
        self.faults.report_fatal_fault(reason);
    }

    pub(crate) fn teardown(&self) {
        let mut state = self.state.lock();
        if !state.send.is_closing() {
            info!("device teardown");
        }
        state.send.close();

        let drained = state.registry.drain();
        let mut released = Vec::new();
        for (id, pending) in drained {
            match pending {
                Pending::Request(mut completer) => {
                    if completer.complete(Err(EngineError::LinkDown)) {
                        debug!(id, "request failed by teardown");
                    }
                }
                Pending::Inference(core) => {
                    core.fail();
                    debug!(id, status = %core.status(), "inference failed by teardown");
                    released.push(core);
                }
            }
        }
        self.send_cv.notify_all();
        drop(state);
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_support::{offline_device, reply_to_next};
    use npulink_wire::{ProtocolVersion, VERSION_MAJOR, VERSION_MINOR};

    use super::*;

    #[test]
    fn teardown_rejects_new_requests() {
        let (device, _core) = offline_device();
        device.teardown();
        assert!(device.is_closing());
        assert!(matches!(device.ping(), Err(EngineError::Closed)));
        assert!(matches!(
            device.check_version(),
            Err(EngineError::Closed)
        ));
        // Idempotent.
        device.teardown();
    }

    #[test]
    fn teardown_fails_pending_request() {
        let (device, core) = offline_device();
        let device = Arc::new(device);
        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.check_version())
        };

        core.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        device.teardown();
        assert!(matches!(waiter.join().unwrap(), Err(EngineError::LinkDown)));
        assert_eq!(device.pending_transactions(), 0);
    }

    #[test]
    fn interrupt_unblocks_waiting_request() {
        let (device, core) = offline_device();
        let device = Arc::new(device);
        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.check_version())
        };

        core.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        // The request is registered before it is sent.
        device.interrupt();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EngineError::Interrupted)
        ));
        assert_eq!(device.pending_transactions(), 0);
        assert!(!device.is_closing());
    }

    #[test]
    fn ping_uses_id_zero() {
        let (device, core) = offline_device();
        device.ping().unwrap();
        let raw = core.try_recv().unwrap();
        let msg = npulink_wire::decode_message(&raw).unwrap();
        assert_eq!(msg.id, 0);
        assert_eq!(msg.payload, Payload::Ping);
    }

    #[test]
    fn request_round_trip() {
        let (device, core) = offline_device();
        let remote = reply_to_next(core, |msg| {
            Some(Message::new(
                msg.id,
                Payload::VersionResponse(ProtocolVersion {
                    major: VERSION_MAJOR,
                    minor: VERSION_MINOR,
                    patch: 3,
                }),
            ))
        });
        let version = device.check_version().unwrap();
        assert_eq!(version.patch, 3);
        remote.join().unwrap();
    }
}
