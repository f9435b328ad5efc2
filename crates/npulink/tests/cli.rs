#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

use serde_json::Value;

fn npulink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_npulink"))
        .args(args)
        .env_remove("NPULINK_LOG_LEVEL")
        .output()
        .expect("npulink should run")
}

fn json_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "stdout should be json ({e}): {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn version_prints_package_version() {
    let output = npulink(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("npulink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn probe_reports_capabilities() {
    let output = npulink(&["probe", "--format", "json", "--sim-product-major", "2"]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["capabilities"]["hw_id"]["product_major"], 2);
    assert_eq!(json["capabilities"]["hw_cfg"]["macs_per_cc"], 8);
}

#[test]
fn probe_rejects_incompatible_protocol() {
    let output = npulink(&["probe", "--sim-version", "9.9.0"]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("protocol version mismatch"), "{stderr}");
}

#[test]
fn net_info_describes_indexed_network() {
    let output = npulink(&["net-info", "--index", "4", "--format", "json"]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["description"], "sim-net-4");
    assert_eq!(json["ifm_sizes"][0], 224 * 224 * 3);
}

#[test]
fn infer_reports_pmu_counters() {
    let output = npulink(&[
        "infer",
        "--index",
        "0",
        "--pmu-event",
        "3",
        "--cycles",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["status"], "Ok");
    assert_eq!(json["pmu_event_config"][0], 3);
    assert_eq!(json["pmu_event_count"][0], 3000);
    assert_eq!(json["pmu_cycle_counter_enable"], true);
    assert!(json["cancel"].is_null());
}

#[test]
fn rejected_inference_fails() {
    let output = npulink(&["infer", "--index", "0", "--sim-reject", "--format", "raw"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Rejected");
}

#[test]
fn cancelled_inference_is_aborted() {
    let output = npulink(&[
        "infer",
        "--index",
        "0",
        "--sim-latency",
        "5s",
        "--cancel-after",
        "20ms",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["status"], "Aborted");
    assert_eq!(json["cancel"], "Ok");
}

#[test]
fn zero_size_buffer_is_usage_error() {
    let output = npulink(&["infer", "--index", "0", "--ifm-size", "0"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn invalid_timeout_is_usage_error() {
    let output = npulink(&["probe", "--timeout", "soon"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn unbounded_durations_are_accepted() {
    let forever = format!("{}s", u64::MAX);
    let output = npulink(&[
        "infer",
        "--index",
        "0",
        "--sim-latency",
        &forever,
        "--wait-timeout",
        &forever,
        "--cancel-after",
        "20ms",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{output:?}");
    let json = json_stdout(&output);
    assert_eq!(json["status"], "Aborted");
    assert_eq!(json["cancel"], "Ok");
}
