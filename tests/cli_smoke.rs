//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("clash");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("attach"));
}

#[test]
fn bare_invocation_prints_usage_and_fails() {
    let mut cmd = cargo_bin_cmd!("clash");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn logs_without_attach_is_rejected() {
    let mut cmd = cargo_bin_cmd!("clash");
    cmd.args(["run", "--logs", "echo hi"])
        .assert()
        .failure()
        .stderr(contains("--attach"));
}

#[test]
fn missing_token_is_reported_before_any_request() {
    let mut cmd = cargo_bin_cmd!("clash");
    cmd.env_remove("CLASH_ACCESS_TOKEN")
        .env_remove("GOOGLE_OAUTH_ACCESS_TOKEN")
        .env_remove("CLASH_CONFIG_PATH")
        .args(["attach", "clash-job-1"])
        .assert()
        .code(1)
        .stderr(contains("CLASH_ACCESS_TOKEN"));
}
