#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use npulink_engine::{Device, EngineConfig, FaultReporter, HostDmaAllocator};
use npulink_transport::{memory_pair, CoreEndpoint};
use npulink_wire::{decode_message, encode_message, Message};

/// Fault reporter that remembers every reason it was given.
#[derive(Default)]
pub struct RecordingFaults {
    reasons: Mutex<Vec<String>>,
}

impl RecordingFaults {
    pub fn count(&self) -> usize {
        self.reasons.lock().expect("faults lock").len()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().expect("faults lock").clone()
    }
}

impl FaultReporter for RecordingFaults {
    fn report_fatal_fault(&self, reason: &str) {
        self.reasons
            .lock()
            .expect("faults lock")
            .push(reason.to_string());
    }
}

pub struct Harness {
    pub device: Arc<Device>,
    pub core: Arc<CoreEndpoint>,
    pub faults: Arc<RecordingFaults>,
}

pub fn harness(capacity: usize, config: EngineConfig) -> Harness {
    let (transport, core) = memory_pair(capacity);
    let faults = Arc::new(RecordingFaults::default());
    let device = Device::with_collaborators(
        Arc::new(transport),
        Arc::new(HostDmaAllocator::new()),
        faults.clone(),
        config,
    );
    core.attach(device.dispatcher());
    Harness {
        device: Arc::new(device),
        core: Arc::new(core),
        faults,
    }
}

pub fn fast_config() -> EngineConfig {
    EngineConfig::default().with_response_timeout(Duration::from_millis(500))
}

pub fn encode(message: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf).expect("encode");
    buf
}

pub fn deliver(core: &CoreEndpoint, message: &Message) {
    core.deliver(&encode(message)).expect("deliver");
}

/// Receive and decode the next host message.
pub fn recv(core: &CoreEndpoint) -> Message {
    let raw = core
        .recv_timeout(Duration::from_secs(5))
        .expect("recv")
        .expect("host sent nothing");
    decode_message(&raw).expect("decode")
}

/// Simulated core subsystem answering host messages on its own thread.
pub struct RemoteCore {
    stop: Arc<AtomicBool>,
    handled: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl RemoteCore {
    /// Serve every host message with `respond`; each returned message is
    /// delivered in order.
    pub fn spawn<F>(core: Arc<CoreEndpoint>, mut respond: F) -> Self
    where
        F: FnMut(Message) -> Vec<Message> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicUsize::new(0));
        let thread = {
            let stop = stop.clone();
            let handled = handled.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let raw = match core.recv_timeout(Duration::from_millis(20)) {
                        Ok(Some(raw)) => raw,
                        Ok(None) => continue,
                        Err(_) => break,
                    };
                    let request = decode_message(&raw).expect("decode");
                    for reply in respond(request) {
                        let _ = core.deliver(&encode(&reply));
                    }
                    handled.fetch_add(1, Ordering::AcqRel);
                }
            })
        };
        Self {
            stop,
            handled,
            thread: Some(thread),
        }
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::Acquire)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RemoteCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Transport that reports "full" for the first `full_for` attempts and
/// records every message it accepts.
pub struct ScriptedTransport {
    full_for: AtomicUsize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new(full_for: usize) -> Self {
        Self {
            full_for: AtomicUsize::new(full_for),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|raw| decode_message(raw).expect("decode sent"))
            .collect()
    }
}

impl npulink_transport::Transport for ScriptedTransport {
    fn try_send(&self, message: &[u8]) -> npulink_transport::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let full = self
            .full_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if full {
            return Err(npulink_transport::TransportError::WouldBlock);
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push(message.to_vec());
        Ok(())
    }
}
