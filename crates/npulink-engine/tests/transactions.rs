mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{deliver, encode, fast_config, harness, recv, RemoteCore};
use npulink_engine::{EngineConfig, EngineError, PROTOCOL_VERSION};
use npulink_wire::{
    CapabilitiesResponse, ErrorKind, ErrorReport, Message, NetworkInfoResponse, Payload,
    RemoteStatus, BUFFER_MAX, MAGIC,
};

fn capabilities(product_major: u32) -> CapabilitiesResponse {
    CapabilitiesResponse {
        product_major,
        arch_major_rev: 1,
        macs_per_cc: 8,
        ..Default::default()
    }
}

fn network_info(status: RemoteStatus, ofm_count: u32) -> NetworkInfoResponse {
    let mut ifm_size = [0; BUFFER_MAX];
    ifm_size[0] = 1024;
    let mut ofm_size = [0; BUFFER_MAX];
    ofm_size[0] = 16;
    NetworkInfoResponse {
        desc: NetworkInfoResponse::encode_description("mobilenet_v2"),
        ifm_count: 1,
        ifm_size,
        ofm_count,
        ofm_size,
        status,
    }
}

#[test]
fn probe_checks_version_then_caches_capabilities() {
    let h = harness(8, fast_config());
    let remote = RemoteCore::spawn(h.core.clone(), |msg| match msg.payload {
        Payload::VersionRequest => vec![Message::new(
            msg.id,
            Payload::VersionResponse(PROTOCOL_VERSION),
        )],
        Payload::CapabilitiesRequest => vec![Message::new(
            msg.id,
            Payload::CapabilitiesResponse(capabilities(2)),
        )],
        _ => Vec::new(),
    });

    assert!(h.device.capabilities().is_none());
    let caps = h.device.probe().expect("probe");
    assert_eq!(caps.hw_id.product_major, 2);
    assert_eq!(caps.hw_cfg.macs_per_cc, 8);
    assert_eq!(h.device.capabilities(), Some(caps));
    assert_eq!(h.device.pending_transactions(), 0);
    assert_eq!(h.faults.count(), 0);
    remote.stop();
}

#[test]
fn late_response_is_dropped_and_next_request_succeeds() {
    let config = EngineConfig::default().with_response_timeout(Duration::from_millis(200));
    let h = harness(8, config);
    let core = h.core.clone();
    let (late_sent, late_delivered) = std::sync::mpsc::channel();
    let remote = std::thread::spawn(move || {
        let first = recv(&core);
        std::thread::sleep(Duration::from_millis(400));
        deliver(
            &core,
            &Message::new(first.id, Payload::CapabilitiesResponse(capabilities(1))),
        );
        late_sent.send(()).unwrap();
        let second = recv(&core);
        assert_ne!(second.id, first.id);
        deliver(
            &core,
            &Message::new(second.id, Payload::CapabilitiesResponse(capabilities(2))),
        );
    });

    let err = h.device.query_capabilities().unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(err.is_timeout());
    assert_eq!(h.device.pending_transactions(), 0);
    late_delivered.recv().unwrap();

    let caps = h.device.query_capabilities().expect("second query");
    assert_eq!(caps.hw_id.product_major, 2);
    remote.join().unwrap();
    assert_eq!(h.faults.count(), 0);
}

#[test]
fn out_of_order_responses_reach_their_callers() {
    let h = harness(8, fast_config());
    let core = h.core.clone();
    let remote = std::thread::spawn(move || {
        let requests: Vec<Message> = (0..4).map(|_| recv(&core)).collect();
        for request in requests.iter().rev() {
            // Echo the id back in the product field so callers can check it.
            deliver(
                &core,
                &Message::new(
                    request.id,
                    Payload::CapabilitiesResponse(capabilities(request.id as u32)),
                ),
            );
        }
    });

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let device = h.device.clone();
            std::thread::spawn(move || device.query_capabilities())
        })
        .collect();
    let mut products: Vec<u32> = callers
        .into_iter()
        .map(|c| c.join().unwrap().expect("query").hw_id.product_major)
        .collect();
    remote.join().unwrap();

    products.sort_unstable();
    products.dedup();
    assert_eq!(products.len(), 4);
}

#[test]
fn network_info_is_validated() {
    let h = harness(8, fast_config());
    let responses = Arc::new(std::sync::Mutex::new(vec![
        network_info(RemoteStatus::Ok, 1),
        network_info(RemoteStatus::Ok, BUFFER_MAX as u32 + 1),
        network_info(RemoteStatus::Error, 1),
        NetworkInfoResponse {
            desc: [b'x'; 32],
            ..network_info(RemoteStatus::Ok, 1)
        },
    ]));
    let remote = {
        let responses = responses.clone();
        RemoteCore::spawn(h.core.clone(), move |msg| {
            let rsp = responses.lock().unwrap().remove(0);
            vec![Message::new(msg.id, Payload::NetworkInfoResponse(rsp))]
        })
    };
    let network = h.device.create_network_from_index(3);

    let info = h.device.network_info(&network).expect("valid info");
    assert_eq!(info.description, "mobilenet_v2");
    assert_eq!(info.ifm_sizes, vec![1024]);
    assert_eq!(info.ofm_sizes, vec![16]);

    for _ in 0..3 {
        let err = h.device.network_info(&network).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)), "{err}");
    }
    remote.stop();
}

#[test]
fn inbound_ping_is_answered_with_pong() {
    let h = harness(8, fast_config());
    deliver(&h.core, &Message::new(7, Payload::Ping));
    let pong = recv(&h.core);
    assert_eq!(pong.payload, Payload::Pong);
    assert_eq!(pong.id, 0);
}

#[test]
fn error_report_escalates_as_fault() {
    let h = harness(8, fast_config());
    deliver(
        &h.core,
        &Message::new(
            0,
            Payload::Error(ErrorReport::new(ErrorKind::InvalidPayload, "bad payload")),
        ),
    );
    assert_eq!(h.faults.count(), 1);
    assert!(h.faults.reasons()[0].contains("bad payload"));
}

#[test]
fn garbage_is_dropped_without_disturbing_requests() {
    let h = harness(8, fast_config());

    let mut bad_magic = encode(&Message::new(1, Payload::Pong)).to_vec();
    bad_magic[0] ^= 0xff;
    h.core.deliver(&bad_magic).unwrap();

    let mut unknown_type = Vec::new();
    unknown_type.extend_from_slice(&MAGIC.to_le_bytes());
    unknown_type.extend_from_slice(&99u32.to_le_bytes());
    unknown_type.extend_from_slice(&1u64.to_le_bytes());
    h.core.deliver(&unknown_type).unwrap();

    h.core.deliver(&[1, 2, 3]).unwrap();

    let remote = RemoteCore::spawn(h.core.clone(), |msg| {
        vec![Message::new(
            msg.id,
            Payload::VersionResponse(PROTOCOL_VERSION),
        )]
    });
    assert_eq!(h.device.check_version().unwrap(), PROTOCOL_VERSION);
    assert_eq!(h.faults.count(), 0);
    remote.stop();
}

#[test]
fn response_of_wrong_type_is_ignored() {
    let config = EngineConfig::default().with_response_timeout(Duration::from_millis(200));
    let h = harness(8, config);
    let remote = RemoteCore::spawn(h.core.clone(), |msg| {
        vec![Message::new(
            msg.id,
            Payload::CapabilitiesResponse(capabilities(1)),
        )]
    });
    let err = h.device.check_version().unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert_eq!(h.device.pending_transactions(), 0);
    remote.stop();
}

#[test]
fn interrupt_releases_every_waiter() {
    let config = EngineConfig::default().with_response_timeout(Duration::from_secs(30));
    let h = harness(8, config);
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let device = h.device.clone();
            std::thread::spawn(move || device.query_capabilities())
        })
        .collect();
    for _ in 0..3 {
        recv(&h.core);
    }

    h.device.interrupt();
    for waiter in waiters {
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EngineError::Interrupted)
        ));
    }
    assert_eq!(h.device.pending_transactions(), 0);
}

#[test]
fn teardown_fails_waiters_and_rejects_new_work() {
    let config = EngineConfig::default().with_response_timeout(Duration::from_secs(30));
    let h = harness(8, config);
    let waiter = {
        let device = h.device.clone();
        std::thread::spawn(move || device.query_capabilities())
    };
    recv(&h.core);

    h.device.teardown();
    assert!(matches!(waiter.join().unwrap(), Err(EngineError::LinkDown)));
    assert!(matches!(
        h.device.query_capabilities(),
        Err(EngineError::Closed)
    ));
    assert_eq!(h.faults.count(), 0);
}
