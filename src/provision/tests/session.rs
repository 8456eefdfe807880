//! Session lifecycle: one close per connection, on success and failure alike.

use super::super::{RunResult, Step};
use super::fixtures::{
    FakeBackend, provisioner, request, script_successful_remote, session_with_runner,
};
use crate::aws::AwsBackendError;
use crate::test_support::CommandInvocation;

fn close_invocations(invocations: &[CommandInvocation]) -> Vec<&CommandInvocation> {
    invocations
        .iter()
        .filter(|invocation| invocation.command_string().contains("-O exit"))
        .collect()
}

fn control_path(invocation: &CommandInvocation) -> String {
    invocation
        .args
        .iter()
        .filter_map(|arg| arg.to_str())
        .find(|arg| arg.starts_with("ControlPath="))
        .expect("invocation names its control path")
        .to_owned()
}

#[tokio::test]
async fn the_session_closes_exactly_once_after_success() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    let invocations = runner.invocations();
    let closes = close_invocations(&invocations);
    assert_eq!(closes.len(), 1, "exactly one close per connection");
    let connect = invocations.first().expect("connect is recorded");
    let close = closes.first().expect("close is recorded");
    assert_eq!(
        control_path(connect),
        control_path(close),
        "the close targets the socket the master created"
    );
}

#[tokio::test]
async fn the_session_closes_exactly_once_after_a_failed_step() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    runner.push_success();
    runner.push_output(Some(1), "", "read-only file system");
    runner.push_success();

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    let RunResult::Failure { failed, .. } = result else {
        panic!("run should fail");
    };
    assert_eq!(failed, Step::UploadArtifacts);
    let invocations = runner.invocations();
    assert_eq!(close_invocations(&invocations).len(), 1);
    assert!(
        invocations
            .last()
            .is_some_and(|invocation| invocation.command_string().contains("-O exit")),
        "teardown is the final act of the run"
    );
}

#[tokio::test]
async fn a_close_failure_is_appended_to_the_run_failure() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    runner.push_success();
    runner.push_output(Some(1), "", "read-only file system");
    runner.push_output(
        Some(255),
        "",
        "Control socket connect: No such file or directory",
    );

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    let RunResult::Failure { reason, .. } = result else {
        panic!("run should fail");
    };
    assert!(
        reason.contains("read-only file system")
            && reason.contains("closing the session also failed"),
        "both failures should surface: {reason}"
    );
}

#[tokio::test]
async fn a_close_failure_after_success_is_tolerated() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    runner.push_success();
    for _ in 0..3 {
        runner.push_success();
    }
    runner.push_success();
    runner.push_output(Some(0), "active\n", "");
    runner.push_output(
        Some(255),
        "",
        "Control socket connect: No such file or directory",
    );

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    assert!(
        result.is_success(),
        "a teardown problem must not fail a verified device: {result:?}"
    );
}

#[tokio::test]
async fn no_close_happens_when_the_run_never_connected() {
    let backend = FakeBackend::new();
    backend.fail_next(
        "ensure_role",
        AwsBackendError::AccessDenied {
            operation: "CreateRole",
            message: String::from("not authorised"),
        },
    );
    let (session, runner) = session_with_runner();

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    assert!(!result.is_success());
    assert!(runner.invocations().is_empty(), "no session, no teardown");
}

#[tokio::test]
async fn a_failed_connection_leaves_nothing_to_close() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    for _ in 0..3 {
        runner.push_output(
            Some(255),
            "",
            "ssh: connect to host edge-01.local port 22: Connection refused",
        );
    }

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    let RunResult::Failure { failed, .. } = result else {
        panic!("run should fail");
    };
    assert_eq!(failed, Step::Connect);
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 3, "three connection attempts, no close");
    assert!(close_invocations(&invocations).is_empty());
}

#[tokio::test]
async fn an_authentication_rejection_fails_the_connection_immediately() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    runner.push_output(
        Some(255),
        "",
        "ubuntu@edge-01.local: Permission denied (publickey).",
    );

    let result = provisioner(backend, session).run(&request("edge-01")).await;

    let RunResult::Failure {
        failed,
        reason,
        steps,
        ..
    } = result
    else {
        panic!("run should fail");
    };
    assert_eq!(failed, Step::Connect);
    assert!(
        reason.contains("rejected authentication"),
        "reason: {reason}"
    );
    assert_eq!(
        runner.invocations().len(),
        1,
        "a rejection is not retried against a lockout"
    );
    let record = steps.last().expect("connect step is recorded");
    assert_eq!(record.attempts, 1);
}
