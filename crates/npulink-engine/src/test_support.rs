use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use npulink_transport::{memory_pair, CoreEndpoint};
use npulink_wire::{decode_message, encode_message, Message};

use crate::config::EngineConfig;
use crate::device::Device;
use crate::dma::HostDmaAllocator;
use crate::fault::FaultReporter;

#[derive(Default)]
pub(crate) struct CountingFaults {
    count: AtomicUsize,
}

impl CountingFaults {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl FaultReporter for CountingFaults {
    fn report_fatal_fault(&self, _reason: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Device wired to an in-memory core endpoint that nobody serves.
pub(crate) fn offline_device() -> (Device, CoreEndpoint) {
    let (device, core, _) = test_device_with_faults();
    (device, core)
}

pub(crate) fn test_device_with_faults() -> (Device, CoreEndpoint, Arc<CountingFaults>) {
    let (transport, core) = memory_pair(8);
    let faults = Arc::new(CountingFaults::default());
    let device = Device::with_collaborators(
        Arc::new(transport),
        Arc::new(HostDmaAllocator::new()),
        faults.clone(),
        EngineConfig::default().with_response_timeout(Duration::from_millis(500)),
    );
    core.attach(device.dispatcher());
    (device, core, faults)
}

/// Answer the next host message with whatever `reply` returns.
pub(crate) fn reply_to_next<F>(core: CoreEndpoint, reply: F) -> JoinHandle<()>
where
    F: FnOnce(Message) -> Option<Message> + Send + 'static,
{
    std::thread::spawn(move || {
        let raw = core
            .recv_timeout(Duration::from_secs(5))
            .expect("recv")
            .expect("host sent nothing");
        let request = decode_message(&raw).expect("decode request");
        if let Some(response) = reply(request) {
            let mut buf = BytesMut::new();
            encode_message(&response, &mut buf).expect("encode response");
            core.deliver(&buf).expect("deliver response");
        }
    })
}
