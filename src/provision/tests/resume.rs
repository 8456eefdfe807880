//! Resume behaviour: populated identifiers are probed, then skipped or redone.

use super::super::{Step, StepState};
use super::fixtures::{
    FakeBackend, provisioner, request, resumed_request, script_successful_remote,
    session_with_runner,
};
use crate::backend::{DeviceRequest, ExistingResources};

fn role_only_request(device: &str) -> DeviceRequest {
    DeviceRequest::builder()
        .device_name(device)
        .existing(ExistingResources {
            role_arn: Some(format!(
                "arn:aws:iam::123456789012:role/{device}TokenExchangeRole"
            )),
            ..ExistingResources::default()
        })
        .build()
        .expect("request builds")
}

#[tokio::test]
async fn a_populated_role_is_probed_then_skipped() {
    let backend = FakeBackend::with_cloud_populated();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");

    let result = provisioner(backend.clone(), session)
        .run(&role_only_request("edge-01"))
        .await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    let first = result.steps().first().expect("role step is recorded");
    assert_eq!(first.step, Step::EnsureRole);
    assert_eq!(first.state, StepState::Skipped);
    assert_eq!(first.attempts, 0);
    assert_eq!(
        backend.call_count("ensure_role"),
        0,
        "a confirmed role is never recreated"
    );
    assert_eq!(backend.call_count("role_exists"), 1);
}

#[tokio::test]
async fn a_vanished_role_is_recreated_despite_the_supplied_arn() {
    let backend = FakeBackend::new();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");

    let result = provisioner(backend.clone(), session)
        .run(&role_only_request("edge-01"))
        .await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    let first = result.steps().first().expect("role step is recorded");
    assert_eq!(first.state, StepState::Succeeded);
    assert_eq!(backend.call_count("role_exists"), 1);
    assert_eq!(
        backend.call_count("ensure_role"),
        1,
        "a vanished role is rebuilt"
    );
}

#[tokio::test]
async fn a_completed_cloud_prefix_resumes_at_the_upload() {
    let backend = FakeBackend::with_cloud_populated();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");

    let result = provisioner(backend.clone(), session)
        .run(&resumed_request("edge-01"))
        .await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    let states: Vec<StepState> = result
        .steps()
        .iter()
        .map(|record| record.state.clone())
        .collect();
    assert_eq!(
        states,
        vec![
            StepState::Skipped,
            StepState::Skipped,
            StepState::Skipped,
            StepState::Skipped,
            StepState::Succeeded,
            StepState::Succeeded,
            StepState::Succeeded,
        ],
        "the cloud prefix and the connection are skipped, work restarts at the upload"
    );
    assert_eq!(backend.call_count("ensure_role"), 0);
    assert_eq!(backend.call_count("ensure_thing_identity"), 0);
    assert_eq!(backend.call_count("attach_policies"), 0);
    assert_eq!(backend.call_count("role_exists"), 1);
    assert_eq!(backend.call_count("thing_exists"), 1);
    assert_eq!(backend.call_count("describe_endpoints"), 1);
    assert_eq!(
        runner.invocations().len(),
        7,
        "the skipped connect step still yields a session on demand"
    );
    assert!(result.resources().has_certificate());
    assert!(result.resources().endpoints.is_some());
}

#[tokio::test]
async fn partially_attached_policies_are_reattached() {
    let backend = FakeBackend::with_cloud_populated();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");
    let mut request = resumed_request("edge-01");
    request.existing.policy_names = vec![String::from("edge-01DevicePolicy")];

    let result = provisioner(backend.clone(), session).run(&request).await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    assert_eq!(
        backend.call_count("attach_policies"),
        1,
        "an incomplete attachment set is completed"
    );
    let attach = result
        .steps()
        .iter()
        .find(|record| record.step == Step::AttachPolicies)
        .expect("attach step is recorded");
    assert_eq!(attach.state, StepState::Succeeded);
    let connect = result
        .steps()
        .iter()
        .find(|record| record.step == Step::Connect)
        .expect("connect step is recorded");
    assert_eq!(
        connect.state,
        StepState::Succeeded,
        "a run that did cloud work connects as its own step"
    );
}

#[tokio::test]
async fn force_recreate_ignores_resume_state() {
    let backend = FakeBackend::with_cloud_populated();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");
    let mut recreate = resumed_request("edge-01");
    recreate.force_recreate = true;

    let result = provisioner(backend.clone(), session).run(&recreate).await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    assert!(
        result
            .steps()
            .iter()
            .all(|record| record.state == StepState::Succeeded),
        "nothing is skipped under force recreate: {:?}",
        result.steps()
    );
    assert_eq!(backend.call_count("ensure_role"), 1);
    assert_eq!(backend.call_count("ensure_thing_identity"), 1);
    assert_eq!(backend.call_count("attach_policies"), 1);
    assert_eq!(backend.call_count("role_exists"), 0, "no probes are wasted");
    assert_eq!(backend.call_count("thing_exists"), 0);
}

#[tokio::test]
async fn a_fresh_request_skips_nothing() {
    let backend = FakeBackend::with_cloud_populated();
    let (session, runner) = session_with_runner();
    script_successful_remote(&runner, "active\n");

    let result = provisioner(backend.clone(), session)
        .run(&request("edge-01"))
        .await;

    assert!(result.is_success(), "run should succeed: {result:?}");
    assert!(
        result
            .steps()
            .iter()
            .all(|record| record.state == StepState::Succeeded),
        "without supplied identifiers every step runs: {:?}",
        result.steps()
    );
    assert_eq!(backend.call_count("ensure_role"), 1);
}
