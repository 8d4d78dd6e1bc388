//! Binary-level checks that need no network.

use mediaserver_image::config::{WorkerConfig, parse_config};
use std::process::Command;
use tempfile::TempDir;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mediaserverimage"))
}

#[test]
fn gen_config_prints_stock_defaults() {
    let output = bin().arg("--gen-config").output().expect("failed to run mediaserverimage");
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert_eq!(parse_config(&text).unwrap(), WorkerConfig::default());
}

#[test]
fn invalid_config_fails_startup() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("worker.toml");
    std::fs::write(&path, "concurrency = 0\n").unwrap();

    let output = bin()
        .arg("--config")
        .arg(&path)
        .output()
        .expect("failed to run mediaserverimage");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("concurrency"), "{stderr}");
}

#[test]
fn unknown_config_key_fails_startup() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("worker.toml");
    std::fs::write(&path, "threads = 4\n").unwrap();

    let output = bin().arg("-c").arg(&path).output().expect("failed to run mediaserverimage");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown field"));
}
