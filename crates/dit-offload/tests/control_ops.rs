// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control surface scenarios: lifecycle, upstream state machine, quotas and
//! the device event worker.

mod common;

use common::{pipe_pair, wait_until, IoctlRecord, MockDevice, RecordingCallback};
use dit_offload::{
    CallbackEvent, IoctlCmd, OffloadConfig, OffloadControl, OffloadError, StatsDelta, WorkerKind,
};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

fn control_with(device: &Arc<MockDevice>) -> OffloadControl {
    OffloadControl::new(
        Arc::clone(device) as Arc<dyn dit_offload::OffloadDevice>,
        Arc::new(OffloadConfig::new()),
    )
}

#[test]
fn test_operations_require_init() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);

    assert_eq!(
        control.stop_offload().unwrap_err(),
        OffloadError::NotInitialized
    );
    assert_eq!(
        control
            .set_local_prefixes(&["127.0.0.0/8".to_string()])
            .unwrap_err(),
        OffloadError::NotInitialized
    );
    assert_eq!(
        control.set_data_limit("dummy0", 1000).unwrap_err(),
        OffloadError::NotInitialized
    );
    assert_eq!(
        control
            .set_upstream_parameters("dummy0", "10.0.0.5", "", &[])
            .unwrap_err(),
        OffloadError::NotInitialized
    );
    assert_eq!(
        control
            .add_downstream("dummy1", "192.168.42.0/24")
            .unwrap_err(),
        OffloadError::NotInitialized
    );

    // stats degrade to zeros instead of failing
    assert_eq!(control.forwarded_stats("dummy0"), StatsDelta::default());
    assert!(device.records().is_empty());
}

#[test]
fn test_init_and_double_init() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);

    control
        .init_offload(RecordingCallback::new())
        .expect("init");
    assert!(control.is_initialized());
    assert_eq!(
        device.records(),
        vec![IoctlRecord::GetHwInfo, IoctlRecord::InitOffload]
    );

    assert_eq!(
        control.init_offload(RecordingCallback::new()).unwrap_err(),
        OffloadError::AlreadyInitialized
    );
}

#[test]
fn test_init_fails_when_hw_info_unavailable() {
    let device = Arc::new(MockDevice::new());
    device.fail_on(IoctlCmd::GetHwInfo);
    let control = control_with(&device);

    let err = control.init_offload(RecordingCallback::new()).unwrap_err();
    assert_eq!(err.to_string(), "can't get hw version");
    assert!(!control.is_initialized());
}

#[test]
fn test_stop_resets_state_even_on_ioctl_failure() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");
    control
        .add_downstream("dummy1", "192.168.42.0/24")
        .expect("downstream");

    device.fail_on(IoctlCmd::StopOffload);
    let err = control.stop_offload().unwrap_err();
    assert_eq!(err.to_string(), "offload hw stop failed");

    // state is reset regardless; the process stays usable
    assert!(!control.is_initialized());
    assert!(control.downstreams().is_empty());
    assert_eq!(
        control.stop_offload().unwrap_err(),
        OffloadError::NotInitialized
    );

    device.clear_failures();
    control
        .init_offload(RecordingCallback::new())
        .expect("re-init");
    assert!(control.is_initialized());
}

#[test]
fn test_set_local_prefixes_validation() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    assert_eq!(
        control.set_local_prefixes(&[]).unwrap_err().to_string(),
        "no prefix"
    );
    assert_eq!(
        control
            .set_local_prefixes(&["bogus".to_string()])
            .unwrap_err()
            .to_string(),
        "prefix parsing error"
    );

    // IPv6 prefixes are accepted but only counted as skipped
    control
        .set_local_prefixes(&["127.0.0.0/8".to_string(), "fe80::/64".to_string()])
        .expect("mixed families");
}

#[test]
fn test_upstream_null_params_stop_offload() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");
    control
        .set_local_prefixes(&["127.0.0.0/8".to_string()])
        .expect("prefixes");
    control
        .set_upstream_parameters("dummy0", "10.0.0.5", "", &[])
        .expect("upstream");
    device.clear_records();

    let err = control
        .set_upstream_parameters("", "", "", &[])
        .unwrap_err();
    assert_eq!(err, OffloadError::UpstreamStopped);
    assert_eq!(
        err.to_string(),
        "stop offload due to upstream null param"
    );

    // the hardware binding is cleared with an empty interface name
    assert_eq!(
        device.records(),
        vec![IoctlRecord::SetUpstreamParam {
            iface: String::new()
        }]
    );
    assert!(control.upstream().iface.is_empty());

    // matcher destroyed and filters detached: flow events are now inert
    device.clear_records();
    let client = Ipv4Addr::new(192, 168, 42, 50);
    control
        .conntrack()
        .set_local_dev_addr(true, u32::from(client), Some(&[1, 2, 3, 4, 5, 6]));
    control.conntrack().handle_event(
        dit_offload::CtFamily::Udp,
        &dit_offload::CtEvent {
            msg_type: dit_offload::CtMsgType::New,
            proto: libc::IPPROTO_UDP as u8,
            orig_src: client,
            repl_dst: Ipv4Addr::new(10, 0, 0, 5),
            orig_src_port: 5000,
            repl_dst_port: 50000,
            ..Default::default()
        },
    );
    assert!(device.records().is_empty());
}

#[test]
fn test_upstream_ipv6_only_reports_success_with_reason() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    let result = control
        .set_upstream_parameters("dummy0", "", "", &["fe80::1".to_string()])
        .expect("ipv6-only is a soft stop");
    assert_eq!(result, Some("stop offload due to ipv6 only"));
    assert_eq!(
        device.records().last(),
        Some(&IoctlRecord::SetUpstreamParam {
            iface: String::new()
        })
    );
}

#[test]
fn test_upstream_validation_and_storage() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    // an existing interface outside the allowed pattern is rejected
    assert_eq!(
        control
            .set_upstream_parameters("lo", "10.0.0.5", "", &[])
            .unwrap_err()
            .to_string(),
        "not supported upstream"
    );

    // an unknown interface fails the stat lookup
    assert_eq!(
        control
            .set_upstream_parameters("rmnet3", "10.0.0.5", "", &[])
            .unwrap_err()
            .to_string(),
        "upstream stat failed"
    );

    // bad addresses surface per-field parse errors
    assert_eq!(
        control
            .set_upstream_parameters("dummy0", "fe80::1", "", &[])
            .unwrap_err()
            .to_string(),
        "v4Addr parsing error"
    );
    assert_eq!(
        control
            .set_upstream_parameters("dummy0", "10.0.0.5", "bogus", &[])
            .unwrap_err()
            .to_string(),
        "v4Gw parsing error"
    );
    assert_eq!(
        control
            .set_upstream_parameters("dummy0", "10.0.0.5", "10.0.0.1", &["1.2.3.4".to_string()])
            .unwrap_err()
            .to_string(),
        "v6Gws parsing error"
    );

    // the full set is stored; IPv6 gateways are kept but never programmed
    control
        .set_upstream_parameters("dummy0", "10.0.0.5", "10.0.0.1", &["fe80::1".to_string()])
        .expect("upstream");
    let upstream = control.upstream();
    assert_eq!(upstream.iface, "dummy0");
    assert_eq!(upstream.v4_addr, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(upstream.v4_gw, Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(upstream.v6_gws.len(), 1);
    assert_eq!(
        device.records().last(),
        Some(&IoctlRecord::SetUpstreamParam {
            iface: "dummy0".to_string()
        })
    );
}

#[test]
fn test_downstream_validation() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    assert_eq!(
        control.add_downstream("", "192.168.42.0/24").unwrap_err(),
        OffloadError::InvalidArgument("iface empty")
    );
    assert_eq!(
        control
            .add_downstream("nosuchif0", "192.168.42.0/24")
            .unwrap_err()
            .to_string(),
        "downstream stat failed"
    );
    assert_eq!(
        control
            .add_downstream("dummy1", "bogus")
            .unwrap_err()
            .to_string(),
        "prefix parsing error"
    );

    // IPv6 downstreams are recorded as skipped, not programmed
    control
        .add_downstream("dummy1", "2001:db8::/64")
        .expect("ipv6 skip");
    assert!(control.downstreams().is_empty());
    assert!(device
        .records()
        .iter()
        .all(|r| !matches!(r, IoctlRecord::AddDownstream { .. })));

    // re-adding an IPv4 downstream replaces the previous entry
    device.set_dst_ring(2);
    control
        .add_downstream("dummy1", "192.168.42.0/24")
        .expect("add");
    device.set_dst_ring(3);
    control
        .add_downstream("dummy1", "192.168.43.0/24")
        .expect("re-add");
    let downstreams = control.downstreams();
    assert_eq!(downstreams.len(), 1);
    assert_eq!(downstreams[0].v4_addr, u32::from(Ipv4Addr::new(192, 168, 43, 0)));
    assert_eq!(downstreams[0].dst_ring, 3);
}

#[test]
fn test_data_limits() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    assert_eq!(
        control.set_data_limit("", 1000).unwrap_err(),
        OffloadError::InvalidArgument("upstream is not set")
    );
    assert_eq!(
        control
            .set_data_limit("nosuchif0", 1000)
            .unwrap_err()
            .to_string(),
        "upstream stat failed"
    );

    control.set_data_limit("dummy0", 5_000_000).expect("limit");
    control
        .set_data_warning_and_limit("dummy0", 4_000_000, 5_000_000)
        .expect("warning/limit");

    let records = device.records();
    assert!(records.contains(&IoctlRecord::SetDataLimit {
        iface: "dummy0".to_string(),
        limit: 5_000_000,
    }));
    assert!(records.contains(&IoctlRecord::SetDataWarningLimit {
        iface: "dummy0".to_string(),
        warning: 4_000_000,
        limit: 5_000_000,
    }));
}

#[test]
fn test_forwarded_stats() {
    let device = Arc::new(MockDevice::new());
    let control = control_with(&device);
    control
        .init_offload(RecordingCallback::new())
        .expect("init");

    device.set_stats(10_000, 20_000, 111, 222);
    assert_eq!(
        control.forwarded_stats("dummy0"),
        StatsDelta {
            rx_diff: 111,
            tx_diff: 222,
        }
    );

    // an ioctl failure flattens to zeros rather than an error
    device.fail_on(IoctlCmd::GetForwardStats);
    assert_eq!(control.forwarded_stats("dummy0"), StatsDelta::default());
}

#[test]
fn test_event_worker_forwards_and_filters_events() {
    let device = Arc::new(MockDevice::new());
    let (read_end, write_end) = pipe_pair();
    device.set_event_pipe(read_end);

    let control = control_with(&device);
    let callback = RecordingCallback::new();
    control.init_offload(callback.clone()).expect("init");
    assert!(wait_until(Duration::from_secs(2), || {
        control.worker_created(WorkerKind::Event)
    }));

    let write = |value: i32| {
        let bytes = value.to_le_bytes();
        // SAFETY: bytes is a live 4-byte buffer for the duration of the call.
        let written =
            unsafe { libc::write(write_end.as_raw_fd(), bytes.as_ptr().cast(), bytes.len()) };
        assert_eq!(written, 4);
    };

    // 5000 is consumed internally; 5 reaches the caller
    write(5000);
    write(5);
    assert!(wait_until(Duration::from_secs(2), || {
        !callback.events.lock().is_empty()
    }));
    assert_eq!(
        callback.events.lock().clone(),
        vec![CallbackEvent::OffloadStoppedLimitReached]
    );

    // closing the device stream terminates the worker and frees its slot
    drop(write_end);
    assert!(wait_until(Duration::from_secs(2), || {
        !control.worker_created(WorkerKind::Event)
    }));

    // a later session relaunches the worker exactly once
    control.stop_offload().expect("stop");
    let (read_end, _write_end) = pipe_pair();
    device.set_event_pipe(read_end);
    control
        .init_offload(RecordingCallback::new())
        .expect("re-init");
    assert!(wait_until(Duration::from_secs(2), || {
        control.worker_created(WorkerKind::Event)
    }));

    control.shutdown();
    assert!(wait_until(Duration::from_secs(2), || {
        !control.worker_created(WorkerKind::Event)
    }));
}
