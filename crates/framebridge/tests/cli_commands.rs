#![cfg(feature = "cli")]

use std::process::{Command, Output};

use serde_json::Value;

fn framebridge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_framebridge"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .env_remove("FRAMEBRIDGE_TIMEOUT")
        .env_remove("FRAMEBRIDGE_SUBDOMAIN")
        .output()
        .expect("framebridge should run")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be one JSON document")
}

#[test]
fn request_then_decode_round_trips_through_the_wire_format() {
    let output = framebridge(&["request", "FetchPage", "--data", r#"{"path":"/inbox"}"#]);
    assert!(output.status.success());
    let encoded = stdout_json(&output);
    let envelope = encoded["envelope"].as_str().unwrap().to_string();
    let request_uuid = encoded["request_uuid"].as_str().unwrap().to_string();

    let output = framebridge(&["decode", &envelope]);
    assert!(output.status.success());
    let decoded = stdout_json(&output);
    assert_eq!(decoded["kind"], "request");
    assert_eq!(decoded["action"], "FetchPage");
    assert_eq!(decoded["request_uuid"], request_uuid.as_str());
    assert_eq!(decoded["data"]["path"], "/inbox");
}

#[test]
fn error_reply_decodes_with_code() {
    let output = framebridge(&[
        "reply",
        "abc-123",
        "--error",
        "timeout",
        "--data",
        r#"{"message":"slow"}"#,
    ]);
    assert!(output.status.success());
    let envelope = stdout_json(&output)["envelope"]
        .as_str()
        .unwrap()
        .to_string();

    let decoded = stdout_json(&framebridge(&["decode", &envelope]));
    assert_eq!(decoded["kind"], "error");
    assert_eq!(decoded["error_code"], "timeout");
    assert_eq!(decoded["protocol_error"], true);
    assert_eq!(decoded["request_uuid"], "abc-123");
}

#[test]
fn malformed_envelope_exits_with_data_invalid() {
    let output = framebridge(&["decode", r#"{"version":1,"request_uuid":"x"}"#]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("decode failed"));
}

#[test]
fn non_object_request_data_is_a_usage_error() {
    let output = framebridge(&["request", "FetchPage", "--data", "[1,2]"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn origin_derives_session_domain_and_judges_senders() {
    let output = framebridge(&[
        "origin",
        "https://example.org:8443/app",
        "--sender",
        "https://session.example.org:8443",
        "--sender",
        "https://example.org:8443",
    ]);
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["session_origin"], "https://session.example.org:8443");
    assert_eq!(report["frame_src"], "https://session.example.org:8443/frame");
    assert_eq!(report["senders"][0]["page_zone"], true);
    assert_eq!(report["senders"][0]["session_zone"], false);
    assert_eq!(report["senders"][1]["session_zone"], true);
}

#[test]
fn origin_rejects_foreign_sender() {
    let output = framebridge(&[
        "origin",
        "https://example.org",
        "--sender",
        "https://evil.example.net",
    ]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn subdomain_comes_from_environment() {
    let output = Command::new(env!("CARGO_BIN_EXE_framebridge"))
        .args(["--format", "json", "origin", "https://example.org"])
        .env("FRAMEBRIDGE_SUBDOMAIN", "domus")
        .output()
        .expect("framebridge should run");
    assert!(output.status.success());
    assert_eq!(
        stdout_json(&output)["session_origin"],
        "https://domus.example.org"
    );
}

#[test]
fn check_reports_type_mismatch() {
    let ok = framebridge(&["check", "string|null", "null"]);
    assert!(ok.status.success());
    assert_eq!(stdout_json(&ok)["passed"], true);

    let failed = framebridge(&["check", "uint", "-1", "--label", "count"]);
    assert_eq!(failed.status.code(), Some(60));
    let report = stdout_json(&failed);
    assert_eq!(report["passed"], false);
    assert!(report["errors"][0].as_str().unwrap().starts_with("count:"));

    let unknown = framebridge(&["check", "strnig", "\"x\""]);
    assert_eq!(unknown.status.code(), Some(64));
}

#[test]
fn heartbeat_freshness_boundary() {
    let fresh = framebridge(&["heartbeat", r#"{"time":1000}"#, "--now", "4000"]);
    assert!(fresh.status.success());
    assert_eq!(stdout_json(&fresh)["decision"], "reuse");

    let stale = framebridge(&["heartbeat", r#"{"time":1000}"#, "--now", "4001"]);
    assert_eq!(stale.status.code(), Some(30));
    assert_eq!(stdout_json(&stale)["decision"], "create");

    let missing = framebridge(&["heartbeat", "--now", "4001"]);
    assert_eq!(missing.status.code(), Some(30));
}

#[test]
fn simulate_elects_one_frame_for_all_tabs() {
    let output = framebridge(&["simulate", "--tabs", "3", "--requests", "2"]);
    assert!(output.status.success());
    let summary = stdout_json(&output);
    assert_eq!(summary["requests"], 6);
    assert_eq!(summary["completed"], 6);
    assert_eq!(summary["frames_booted"], 1);
    assert_eq!(summary["owner"], "tab-1");
    assert_eq!(summary["live_frame"], "tab-1/framebridge-session");
}

#[test]
fn simulate_recovers_from_crashed_owner() {
    let output = framebridge(&["simulate", "--tabs", "2", "--crash-owner"]);
    assert!(output.status.success());
    let summary = stdout_json(&output);
    assert_eq!(summary["rounds"], 2);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["frames_booted"], 2);
    assert_eq!(summary["owner"], "tab-3");
    assert_eq!(summary["live_frame"], "tab-3/framebridge-session");
}

#[test]
fn simulate_detail_lists_every_request() {
    let output = framebridge(&[
        "simulate",
        "--tabs",
        "2",
        "--unload-owner",
        "--requests-detail",
    ]);
    assert!(output.status.success());
    let rows = stdout_json(&output);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row["outcome"] == "ok"));
    assert_eq!(rows[2]["tab"], "tab-3");
    assert_eq!(rows[2]["frame"], "tab-3/framebridge-session");
}

#[test]
fn version_prints_package_version() {
    let output = framebridge(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("framebridge {}", env!("CARGO_PKG_VERSION"))
    );
}
