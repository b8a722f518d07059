#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

const REF: &str = "cgr.dev/chainguard/wolfi-base@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn exectestctl() -> Command {
    let mut cmd = Command::cargo_bin("exectestctl").unwrap();
    cmd.env_remove("EXEC_TEST_DEFAULT_TIMEOUT_SECONDS")
        .env_remove("EXEC_TEST_LOG_JSON")
        .env("EXEC_TEST_OFFLINE", "true")
        .env("EXEC_TEST_TERMINATION_GRACE_MS", "500");
    cmd
}

#[test]
fn run_prints_response_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = exectestctl()
        .arg("run")
        .arg("--digest")
        .arg(REF)
        .arg("--script")
        .arg("echo IMAGE_REGISTRY=$IMAGE_REGISTRY FOO=$FOO")
        .arg("--env")
        .arg("FOO=bar")
        .arg("--working-dir")
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let response: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["digest"], REF);
    assert_eq!(response["id"], REF);
    assert_eq!(response["exit_code"], 0);
    assert_eq!(response["output"], "IMAGE_REGISTRY=cgr.dev FOO=bar\n");
}

#[test]
fn run_failure_prints_contract_message() {
    let expected = format!(
        "Test failed for ref\n{},\ngot error: exit status 12\nfailed\n",
        REF
    );
    exectestctl()
        .arg("run")
        .arg("--digest")
        .arg(REF)
        .arg("--script")
        .arg("echo failed && exit 12")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains(expected));
}

#[test]
fn run_timeout_prints_contract_message() {
    let expected = format!("Test for ref\n{}\ntimed out after 1 seconds", REF);
    exectestctl()
        .arg("run")
        .arg("--digest")
        .arg(REF)
        .arg("--script")
        .arg("sleep 6")
        .arg("--timeout-seconds")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains(expected));
}

#[test]
fn default_timeout_comes_from_environment() {
    let expected = format!("Test for ref\n{}\ntimed out after 1 seconds", REF);
    exectestctl()
        .env("EXEC_TEST_DEFAULT_TIMEOUT_SECONDS", "1")
        .arg("run")
        .arg("--digest")
        .arg(REF)
        .arg("--script")
        .arg("sleep 6")
        .assert()
        .failure()
        .stderr(predicate::str::contains(expected));
}

#[test]
fn offline_mode_rejects_tags() {
    exectestctl()
        .arg("run")
        .arg("--digest")
        .arg("cgr.dev/chainguard/wolfi-base:latest")
        .arg("--script")
        .arg("true")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be digest-pinned"));
}

#[test]
fn batch_reports_every_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tests.yaml");
    fs::write(dir.path().join("marker.txt"), "present\n").unwrap();
    fs::write(
        &path,
        format!(
            r#"
requests:
  - name: reads-marker
    digest: "{REF}"
    script: cat marker.txt
  - name: fails
    digest: "{REF}"
    script: echo nope && exit 3
"#
        ),
    )
    .unwrap();

    let output = exectestctl().arg("batch").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let results: Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["name"], "reads-marker");
    assert_eq!(results[0]["response"]["output"], "present\n");
    assert_eq!(results[1]["name"], "fails");
    assert_eq!(
        results[1]["error"],
        format!("Test failed for ref\n{},\ngot error: exit status 3\nnope\n", REF)
    );
}

#[test]
fn invalid_env_flag_is_rejected() {
    exectestctl()
        .arg("run")
        .arg("--digest")
        .arg(REF)
        .arg("--script")
        .arg("true")
        .arg("--env")
        .arg("NOEQUALS")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected NAME=VALUE"));
}

#[test]
fn version_prints_package_version() {
    exectestctl()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
