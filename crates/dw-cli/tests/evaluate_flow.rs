//! End-to-end tests for the `dw` binary.
//!
//! Each test runs the binary with an isolated `HOME`, so the only
//! configuration it sees is what the test writes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const TIMELINE: &str = r#"[
  {"source":"kube_event","locator":{"kind":"pod","keys":{"ns":"openshift-etcd","pod":"etcd-guard-1","node":"n1"}},"message":{"reason":"Unhealthy","human":"Readiness probe failed","annotations":{"count":"50"}},"from":"2025-01-15T09:00:00Z","to":"2025-01-15T09:10:00Z"},
  {"source":"kube_event","locator":{"kind":"pod","keys":{"ns":"openshift-etcd","pod":"etcd-guard-1","node":"n1"}},"message":{"reason":"Unhealthy","human":"Readiness probe failed","annotations":{"count":"35"}},"from":"2025-01-15T09:20:00Z","to":"2025-01-15T09:25:00Z"},
  {"source":"kube_event","locator":{"kind":"pod","keys":{"ns":"openshift-dns","pod":"dns-default-x"}},"message":{"reason":"BackOff","human":"Back-off restarting failed container","annotations":{"count":"3"}},"from":"2025-01-15T09:00:00Z","to":"2025-01-15T09:01:00Z"}
]"#;

fn dw_binary() -> String {
    env!("CARGO_BIN_EXE_dw").to_string()
}

fn dw(home: &Path) -> Command {
    let mut cmd = Command::new(dw_binary());
    cmd.env("HOME", home)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("RUST_LOG")
        .env_remove("DW_THRESHOLD")
        .env_remove("DW_API_SERVER")
        .env_remove("DW_TOKEN");
    cmd
}

/// Writes the default config file under the isolated home.
fn write_home_config(home: &Path, content: &str) {
    let dir = home.join(".config/dw");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), content).unwrap();
}

fn write_timeline(temp: &TempDir) -> PathBuf {
    let path = temp.path().join("timeline.json");
    std::fs::write(&path, TIMELINE).unwrap();
    path
}

fn verdicts(output: &Output) -> Vec<Value> {
    assert!(
        output.status.success(),
        "dw should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each stdout line is a JSON verdict"))
        .collect()
}

fn failed(verdicts: &[Value]) -> Vec<&str> {
    verdicts
        .iter()
        .filter(|v| v["passed"] == Value::Bool(false))
        .filter_map(|v| v["name"].as_str())
        .collect()
}

#[test]
fn test_evaluate_reports_worst_occurrence_per_namespace() {
    let temp = TempDir::new().unwrap();
    write_home_config(temp.path(), r#"known_namespaces = ["openshift-etcd", "openshift-dns"]"#);
    let timeline = write_timeline(&temp);

    let output = dw(temp.path())
        .args(["evaluate", "--offline"])
        .arg(&timeline)
        .output()
        .unwrap();
    let verdicts = verdicts(&output);

    // "" bucket, two known namespaces, then the e2e check
    assert_eq!(verdicts.len(), 4);
    assert_eq!(
        failed(&verdicts),
        vec!["[sig-arch] events should not repeat pathologically for ns/openshift-etcd"]
    );

    let failure = verdicts
        .iter()
        .find(|v| v["passed"] == Value::Bool(false))
        .and_then(|v| v["failure_output"].as_str())
        .unwrap();
    assert!(failure.starts_with("1 events happened too frequently"));
    assert!(failure.contains("event happened 50 times"));
    assert!(failure.contains("From: 09:00:00Z To: 09:10:00Z result=reject "));
}

#[test]
fn test_evaluate_config_flag_overrides_home_config() {
    let temp = TempDir::new().unwrap();
    write_home_config(temp.path(), r#"known_namespaces = ["openshift-etcd"]"#);
    let timeline = write_timeline(&temp);

    let override_path = temp.path().join("override.toml");
    std::fs::write(
        &override_path,
        r#"
[[allowances]]
id = "etcd-guard-readiness"
locator = { ns = "^openshift-etcd$", pod = "^etcd-guard-" }
message = "^Readiness probe"
"#,
    )
    .unwrap();

    let output = dw(temp.path())
        .arg("--config")
        .arg(&override_path)
        .args(["evaluate", "--offline"])
        .arg(&timeline)
        .output()
        .unwrap();
    let verdicts = verdicts(&output);

    assert_eq!(verdicts.len(), 3);
    assert!(failed(&verdicts).is_empty());
}

#[test]
fn test_evaluate_threshold_from_environment() {
    let temp = TempDir::new().unwrap();
    write_home_config(temp.path(), r#"known_namespaces = ["openshift-etcd"]"#);
    let timeline = write_timeline(&temp);

    let output = dw(temp.path())
        .env("DW_THRESHOLD", "50")
        .args(["evaluate", "--offline"])
        .arg(&timeline)
        .output()
        .unwrap();

    assert!(failed(&verdicts(&output)).is_empty());
}

#[test]
fn test_evaluate_verbose_keeps_logs_off_stdout() {
    let temp = TempDir::new().unwrap();
    write_home_config(temp.path(), r#"known_namespaces = ["openshift-etcd"]"#);
    let timeline = write_timeline(&temp);

    let output = dw(temp.path())
        .args(["--verbose", "evaluate", "--offline"])
        .arg(&timeline)
        .output()
        .unwrap();

    // verdicts() parses every stdout line as JSON
    assert_eq!(verdicts(&output).len(), 3);
    assert!(String::from_utf8_lossy(&output.stderr).contains("evaluated timeline"));
}

#[test]
fn test_evaluate_rejects_malformed_timeline() {
    let temp = TempDir::new().unwrap();
    let timeline = temp.path().join("timeline.jsonl");
    std::fs::write(&timeline, "{\"source\":\"kube_event\"\nnot json\n").unwrap();

    let output = dw(temp.path())
        .args(["evaluate", "--offline"])
        .arg(&timeline)
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load timeline"));
}

#[test]
fn test_cluster_info_requires_api_server() {
    let temp = TempDir::new().unwrap();

    let output = dw(temp.path()).arg("cluster-info").output().unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing API server"));
}
