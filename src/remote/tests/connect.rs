//! Tests for control master establishment and transport classification.

use rstest::rstest;

use super::super::*;
use super::fixtures::{base_config, scripted_session};
use crate::retry::{ClassifyError, ErrorClass};

#[rstest]
fn connect_builds_a_control_master_invocation(base_config: RemoteConfig) {
    let (session, runner) = scripted_session(base_config);
    runner.push_success();

    let handle = session.connect().expect("connect should succeed");

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1, "exactly one ssh invocation expected");
    let Some(invocation) = invocations.first() else {
        panic!("invocation should be recorded");
    };
    let command = invocation.command_string();
    assert!(
        command.contains("-o ControlMaster=yes"),
        "missing master flag: {command}"
    );
    assert!(
        command.contains("-f -N ubuntu@edge-01.local"),
        "missing background destination: {command}"
    );
    assert!(
        command.contains("-o BatchMode=yes"),
        "missing batch mode: {command}"
    );
    assert!(
        command.contains("-o ConnectTimeout=10"),
        "missing connect timeout: {command}"
    );
    assert!(
        handle.control_path.as_str().starts_with("/tmp/tether-"),
        "control socket should live under the configured directory: {}",
        handle.control_path
    );
    assert!(
        handle.control_path.as_str().ends_with(".sock"),
        "control socket should carry the .sock suffix: {}",
        handle.control_path
    );
    assert_eq!(handle.user, "ubuntu");
    assert_eq!(handle.host, "edge-01.local");
    assert_eq!(handle.port, 22);
}

#[rstest]
fn connect_forwards_the_identity_file(base_config: RemoteConfig) {
    let (session, runner) = scripted_session(base_config);
    runner.push_success();

    session.connect().expect("connect should succeed");

    let invocations = runner.invocations();
    let Some(invocation) = invocations.first() else {
        panic!("invocation should be recorded");
    };
    let command = invocation.command_string();
    assert!(
        command.contains("-i /path/to/key"),
        "missing identity flag: {command}"
    );
}

#[rstest]
#[case::refused(
    "ssh: connect to host edge-01.local port 22: Connection refused",
    ErrorClass::Transient
)]
#[case::timeout(
    "ssh: connect to host edge-01.local port 22: Connection timed out",
    ErrorClass::Transient
)]
#[case::reset(
    "kex_exchange_identification: read: Connection reset by peer",
    ErrorClass::Transient
)]
#[case::auth("ubuntu@edge-01.local: Permission denied (publickey).", ErrorClass::Fatal)]
#[case::host_key("Host key verification failed.", ErrorClass::Fatal)]
#[case::resolve(
    "ssh: Could not resolve hostname edge-01.local: Name or service not known",
    ErrorClass::Fatal
)]
#[case::unknown_noise("unexpected client chatter", ErrorClass::Transient)]
fn connect_failures_are_classified(
    base_config: RemoteConfig,
    #[case] stderr: &str,
    #[case] expected: ErrorClass,
) {
    let (session, runner) = scripted_session(base_config);
    runner.push_output(Some(255), "", stderr);

    let err = session.connect().expect_err("connect should fail");

    assert_eq!(err.classify(), expected, "stderr: {stderr}, error: {err}");
}

#[rstest]
fn connect_without_an_exit_status_is_transient(base_config: RemoteConfig) {
    let (session, runner) = scripted_session(base_config);
    runner.push_missing_exit_code();

    let err = session.connect().expect_err("connect should fail");

    assert!(matches!(err, RemoteError::MissingExitCode { .. }));
    assert_eq!(err.classify(), ErrorClass::Transient);
}

#[rstest]
fn blank_host_fails_validation(base_config: RemoteConfig) {
    let config = RemoteConfig {
        host: String::from("   "),
        ..base_config
    };

    let err = RemoteSession::new(config, crate::test_support::ScriptedRunner::new())
        .expect_err("blank host should be rejected");

    assert!(
        matches!(err, RemoteError::InvalidConfig { ref field } if field == "host"),
        "unexpected error: {err}"
    );
}
