#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

#[test]
fn catalog_lists_every_code() {
    let output = Command::new(env!("CARGO_BIN_EXE_framerelay"))
        .args(["--format", "json", "catalog"])
        .output()
        .expect("catalog should run");

    assert!(output.status.success());
    let entries: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("catalog output should be json");
    let entries = entries.as_array().expect("catalog should be an array");
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[2]["code"], 1113);
    assert_eq!(entries[2]["name"], "GetDetectedFrame");
    assert_eq!(entries[2]["direction"], "client->worker");
    assert_eq!(entries[4]["direction"], "worker->client");
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_framerelay"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("framerelay {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn unsupported_header_size_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_framerelay"))
        .args(["serve", "--header-size", "2", "--port", "0"])
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("header size 2"));
}

#[test]
fn worker_without_relay_times_out() {
    let output = Command::new(env!("CARGO_BIN_EXE_framerelay"))
        .args([
            "worker",
            "--socket",
            "/tmp/framerelay-cli-missing.sock",
            "--connect-timeout",
            "100ms",
        ])
        .output()
        .expect("worker should run");

    assert_eq!(output.status.code(), Some(124));
}
