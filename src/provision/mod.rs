//! Provisioning workflow orchestration.
//!
//! Sequences the cloud identity steps and the on-device installation steps
//! into one resumable run. Each step retries within a bounded policy and
//! appends exactly one audit record; a failure stops the run before the next
//! step starts. Re-running with known resource identifiers skips the steps
//! whose outputs already exist, after a cheap existence probe confirms the
//! cloud still agrees.
//!
//! The orchestrator holds the device session open across the remote steps
//! and closes it exactly once per run, on success and on failure alike.

mod artifacts;
mod step;

pub use artifacts::AgentPlan;
pub use step::{Step, StepRecord, StepState};

use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::backend::{DeviceRequest, EndpointSet, IdentityBackend, KeyMaterial, ThingIdentity};
use crate::remote::{CommandRunner, RemoteError, RemoteSession, SessionHandle};
use crate::retry::{ClassifyError, ErrorClass, RetryError, RetryPolicy};

/// Receives step lifecycle events during a run.
///
/// Implementations are the run's only observability surface; the
/// orchestrator itself never writes to stdout or stderr.
pub trait ProgressReporter {
    /// Called when a step begins executing.
    fn on_step_start(&self, step: Step);

    /// Called before a re-attempt, with the 1-based attempt that failed.
    fn on_step_retry(&self, step: Step, attempt: u32, message: &str);

    /// Called when a step reaches a terminal state.
    fn on_step_complete(&self, step: Step, state: &StepState);
}

/// Reporter that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_step_start(&self, _step: Step) {}

    fn on_step_retry(&self, _step: Step, _attempt: u32, _message: &str) {}

    fn on_step_complete(&self, _step: Step, _state: &StepState) {}
}

/// Cooperative cancellation flag checked between steps.
///
/// Clones share the flag, so a signal handler can cancel a run it does not
/// own. A cancelled run records a failed step and tears down its session in
/// the usual way.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the run stops before its next step.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cloud resources known to exist for a device.
///
/// Once a field is populated it is reused, never silently recreated. The
/// private key lives in memory only; the type deliberately has no
/// serialisation support. Use [`RunResult::to_record`] for a persistable
/// view without key material.
#[derive(Clone, Debug, Default)]
pub struct CloudResourceSet {
    /// ARN of the token exchange role.
    pub role_arn: Option<String>,
    /// Registered thing name.
    pub thing_name: Option<String>,
    /// Identifier of the device certificate.
    pub certificate_id: Option<String>,
    /// ARN of the device certificate.
    pub certificate_arn: Option<String>,
    /// PEM-encoded device certificate.
    pub certificate_pem: Option<String>,
    /// Private key belonging to the certificate.
    pub private_key: Option<KeyMaterial>,
    /// Policies attached to the certificate.
    pub policy_names: Vec<String>,
    /// Endpoints the agent connects through.
    pub endpoints: Option<EndpointSet>,
}

impl CloudResourceSet {
    /// Seeds the set with identifiers supplied for a resumed run.
    #[must_use]
    pub fn from_request(request: &DeviceRequest) -> Self {
        let existing = &request.existing;
        let mut seeded = Self {
            role_arn: existing.role_arn.clone(),
            thing_name: existing.thing_name.clone(),
            policy_names: existing.policy_names.clone(),
            ..Self::default()
        };
        if let Some(certificate) = &existing.certificate {
            seeded.certificate_id = Some(certificate.certificate_id.clone());
            seeded.certificate_arn = Some(certificate.certificate_arn.clone());
            seeded.certificate_pem = Some(certificate.certificate_pem.clone());
            seeded.private_key = Some(certificate.private_key.clone());
        }
        seeded
    }

    /// Whether a complete certificate (identifier, ARN, PEM and key) is held.
    #[must_use]
    pub fn has_certificate(&self) -> bool {
        self.certificate_id.is_some()
            && self.certificate_arn.is_some()
            && self.certificate_pem.is_some()
            && self.private_key.is_some()
    }

    fn apply_identity(&mut self, identity: ThingIdentity) {
        self.thing_name = Some(identity.thing_name);
        self.certificate_id = Some(identity.certificate.certificate_id);
        self.certificate_arn = Some(identity.certificate.certificate_arn);
        self.certificate_pem = Some(identity.certificate.certificate_pem);
        self.private_key = Some(identity.certificate.private_key);
    }
}

/// Terminal outcome of a provisioning run.
#[derive(Clone, Debug)]
pub enum RunResult {
    /// Every step succeeded or was skipped.
    Success {
        /// Resources that exist after the run.
        resources: CloudResourceSet,
        /// Audit trail, one record per step.
        steps: Vec<StepRecord>,
    },
    /// A step failed and the run stopped there.
    Failure {
        /// Step that halted the run.
        failed: Step,
        /// Why the step failed, including any teardown problem.
        reason: String,
        /// Resources that existed when the run stopped.
        resources: CloudResourceSet,
        /// Audit trail up to and including the failed step.
        steps: Vec<StepRecord>,
    },
}

impl RunResult {
    /// Whether the run completed every step.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Audit trail of the run.
    #[must_use]
    pub fn steps(&self) -> &[StepRecord] {
        match self {
            Self::Success { steps, .. } | Self::Failure { steps, .. } => steps,
        }
    }

    /// Resources that exist after the run.
    #[must_use]
    pub const fn resources(&self) -> &CloudResourceSet {
        match self {
            Self::Success { resources, .. } | Self::Failure { resources, .. } => resources,
        }
    }

    /// Builds the persistable record of the run, excluding key material.
    #[must_use]
    pub fn to_record(&self, device_name: &str) -> RunRecord {
        let (outcome, failed_step, reason) = match self {
            Self::Success { .. } => ("succeeded", None, None),
            Self::Failure { failed, reason, .. } => {
                ("failed", Some(*failed), Some(reason.clone()))
            }
        };
        let resources = self.resources();
        RunRecord {
            device: device_name.to_owned(),
            outcome: outcome.to_owned(),
            failed_step,
            reason,
            recorded_at: Utc::now(),
            resources: RecordedResources {
                role_arn: resources.role_arn.clone(),
                thing_name: resources.thing_name.clone(),
                certificate_id: resources.certificate_id.clone(),
                certificate_arn: resources.certificate_arn.clone(),
                policy_names: resources.policy_names.clone(),
                data_endpoint: resources
                    .endpoints
                    .as_ref()
                    .map(|endpoints| endpoints.data_endpoint.clone()),
                credentials_endpoint: resources
                    .endpoints
                    .as_ref()
                    .map(|endpoints| endpoints.credentials_endpoint.clone()),
            },
            steps: self.steps().to_vec(),
        }
    }
}

/// Persistable summary of a run: outcome, resource identifiers and the
/// step-by-step audit trail. Certificate PEM and private key material are
/// deliberately absent.
#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    /// Device the run targeted.
    pub device: String,
    /// Overall outcome, `succeeded` or `failed`.
    pub outcome: String,
    /// Step that halted the run, when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    /// Why the run failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the record was produced.
    pub recorded_at: DateTime<Utc>,
    /// Identifiers of the resources that exist.
    pub resources: RecordedResources,
    /// Per-step audit trail in execution order.
    pub steps: Vec<StepRecord>,
}

/// Resource identifiers safe to persist.
#[derive(Clone, Debug, Serialize)]
pub struct RecordedResources {
    /// ARN of the token exchange role.
    pub role_arn: Option<String>,
    /// Registered thing name.
    pub thing_name: Option<String>,
    /// Identifier of the device certificate.
    pub certificate_id: Option<String>,
    /// ARN of the device certificate.
    pub certificate_arn: Option<String>,
    /// Policies attached to the certificate.
    pub policy_names: Vec<String>,
    /// Data-plane endpoint.
    pub data_endpoint: Option<String>,
    /// Credentials-provider endpoint.
    pub credentials_endpoint: Option<String>,
}

/// Failure inside a single step, unifying backend and device errors.
#[derive(Debug, Error)]
enum StepError<E: std::error::Error + 'static> {
    /// Cloud backend failure.
    #[error(transparent)]
    Backend(E),
    /// Device transport failure.
    #[error(transparent)]
    Remote(RemoteError),
    /// The install command exited unsuccessfully.
    #[error("agent installation failed: {0}")]
    Install(String),
    /// The verification command did not confirm a healthy agent.
    #[error("verification did not confirm the agent: {0}")]
    Unverified(String),
}

impl<E> StepError<E>
where
    E: std::error::Error + ClassifyError + 'static,
{
    // Install and verification failures are retried: both shake out
    // transient network fetches and services that are still starting.
    fn classify(error: &Self) -> ErrorClass {
        match error {
            Self::Backend(source) => source.classify(),
            Self::Remote(source) => source.classify(),
            Self::Install(_) | Self::Unverified(_) => ErrorClass::Transient,
        }
    }
}

/// Drives a device through the provisioning workflow.
///
/// A provisioner executes one run: cloud identity resources first, then the
/// remote installation over a shared session. Construction wires the real
/// collaborators; tests substitute scripted ones through the same seams.
pub struct Provisioner<B, R: CommandRunner, P> {
    backend: B,
    remote: RemoteSession<R>,
    plan: AgentPlan,
    staging: Utf8PathBuf,
    retry: RetryPolicy,
    reporter: P,
    cancel: CancelToken,
}

impl<B, R> Provisioner<B, R, NullReporter>
where
    B: IdentityBackend,
    R: CommandRunner,
{
    /// Creates a provisioner with the default retry policy and no reporter.
    #[must_use]
    pub fn new(backend: B, remote: RemoteSession<R>, plan: AgentPlan) -> Self {
        Self {
            backend,
            remote,
            plan,
            staging: artifacts::staging_dir(),
            retry: RetryPolicy::default(),
            reporter: NullReporter,
            cancel: CancelToken::new(),
        }
    }
}

impl<B, R, P> Provisioner<B, R, P>
where
    B: IdentityBackend,
    R: CommandRunner,
    P: ProgressReporter,
{
    /// Replaces the retry policy applied to every step.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Installs a cancellation token shared with the caller.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the progress reporter.
    #[must_use]
    pub fn with_reporter<Q: ProgressReporter>(self, reporter: Q) -> Provisioner<B, R, Q> {
        Provisioner {
            backend: self.backend,
            remote: self.remote,
            plan: self.plan,
            staging: self.staging,
            retry: self.retry,
            reporter,
            cancel: self.cancel,
        }
    }

    /// Executes the workflow for `request` and returns its terminal outcome.
    ///
    /// Failure is data, not an error: the result carries the failed step,
    /// the resources that already exist and the full audit trail, so the
    /// caller can report, persist and later resume.
    pub async fn run(self, request: &DeviceRequest) -> RunResult {
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut resources = CloudResourceSet::from_request(request);
        let mut session: Option<SessionHandle> = None;

        let failure = self
            .execute_steps(request, &mut resources, &mut steps, &mut session)
            .await;

        let teardown_error = session
            .take()
            .and_then(|handle| self.remote.close(&handle).err());

        match failure {
            None => {
                // Teardown is best-effort once verification has passed.
                RunResult::Success { resources, steps }
            }
            Some((failed, mut reason)) => {
                if let Some(err) = teardown_error {
                    reason = format!("{reason}; closing the session also failed: {err}");
                }
                RunResult::Failure {
                    failed,
                    reason,
                    resources,
                    steps,
                }
            }
        }
    }

    async fn execute_steps(
        &self,
        request: &DeviceRequest,
        resources: &mut CloudResourceSet,
        steps: &mut Vec<StepRecord>,
        session: &mut Option<SessionHandle>,
    ) -> Option<(Step, String)> {
        for step in Step::ALL {
            if self.cancel.is_cancelled() {
                let reason = String::from("run cancelled before this step");
                let record = StepRecord::failed(step, reason.clone(), 0, None);
                self.reporter.on_step_complete(step, &record.state);
                steps.push(record);
                return Some((step, reason));
            }
            if self.should_skip(step, request, resources, steps).await {
                let record = StepRecord::skipped(step);
                self.reporter.on_step_complete(step, &record.state);
                steps.push(record);
                continue;
            }
            self.reporter.on_step_start(step);
            let started = Utc::now();
            let attempts = Cell::new(1_u32);
            match self
                .run_step(step, request, resources, session, &attempts)
                .await
            {
                Ok(()) => {
                    let record = StepRecord::succeeded(step, attempts.get(), started);
                    self.reporter.on_step_complete(step, &record.state);
                    steps.push(record);
                }
                Err(reason) => {
                    let record =
                        StepRecord::failed(step, reason.clone(), attempts.get(), Some(started));
                    self.reporter.on_step_complete(step, &record.state);
                    steps.push(record);
                    return Some((step, reason));
                }
            }
        }
        None
    }

    /// Decides whether a step's outputs already exist.
    ///
    /// Populated identifiers are not trusted blindly: roles and things get a
    /// cheap existence probe first. A probe failure falls through to the
    /// step itself, which retries and reports properly.
    async fn should_skip(
        &self,
        step: Step,
        request: &DeviceRequest,
        resources: &CloudResourceSet,
        steps: &[StepRecord],
    ) -> bool {
        if request.force_recreate {
            return false;
        }
        match step {
            Step::EnsureRole => {
                resources.role_arn.is_some()
                    && self
                        .backend
                        .role_exists(&request.role_name)
                        .await
                        .unwrap_or(false)
            }
            Step::EnsureIdentity => {
                resources.has_certificate()
                    && self
                        .backend
                        .thing_exists(&request.device_name)
                        .await
                        .unwrap_or(false)
            }
            Step::AttachPolicies => request
                .policy_names()
                .iter()
                .all(|name| resources.policy_names.iter().any(|have| have == name)),
            // With the whole cloud prefix already in place the session is
            // opened on demand by the first remote step instead.
            Step::Connect => {
                steps.len() == 3 && steps.iter().all(|record| record.state == StepState::Skipped)
            }
            Step::UploadArtifacts | Step::ConfigureAgent | Step::Verify => false,
        }
    }

    async fn run_step(
        &self,
        step: Step,
        request: &DeviceRequest,
        resources: &mut CloudResourceSet,
        session: &mut Option<SessionHandle>,
        attempts: &Cell<u32>,
    ) -> Result<(), String> {
        match step {
            Step::EnsureRole => {
                let role_arn = self
                    .with_retries(step, attempts, || async {
                        self.backend
                            .ensure_role(request)
                            .await
                            .map_err(StepError::Backend)
                    })
                    .await?;
                resources.role_arn = Some(role_arn);
                Ok(())
            }
            Step::EnsureIdentity => {
                let identity = self
                    .with_retries(step, attempts, || async {
                        self.backend
                            .ensure_thing_identity(request)
                            .await
                            .map_err(StepError::Backend)
                    })
                    .await?;
                resources.apply_identity(identity);
                Ok(())
            }
            Step::AttachPolicies => {
                let Some(certificate_arn) = resources.certificate_arn.clone() else {
                    return Err(String::from(
                        "no certificate is on record to attach policies to",
                    ));
                };
                let names = self
                    .with_retries(step, attempts, || async {
                        self.backend
                            .attach_policies(request, &certificate_arn)
                            .await
                            .map_err(StepError::Backend)
                    })
                    .await?;
                resources.policy_names = names;
                Ok(())
            }
            Step::Connect => {
                let handle = self.connect_with_retries(step, attempts).await?;
                *session = Some(handle);
                Ok(())
            }
            Step::UploadArtifacts => {
                if session.is_none() {
                    *session = Some(self.connect_with_retries(step, attempts).await?);
                }
                let Some(handle) = session.as_ref() else {
                    return Err(String::from("no device session is open"));
                };
                let endpoints = self
                    .with_retries(step, attempts, || async {
                        self.backend
                            .describe_endpoints()
                            .await
                            .map_err(StepError::Backend)
                    })
                    .await?;
                resources.endpoints = Some(endpoints);
                let uploads =
                    artifacts::render_artifacts(&self.plan, request, resources, &self.staging)?;
                for artifact in &uploads {
                    self.with_retries(step, attempts, || async {
                        self.remote
                            .upload(handle, &artifact.bytes, artifact.path.as_str(), artifact.mode)
                            .map_err(StepError::Remote)
                    })
                    .await?;
                }
                Ok(())
            }
            Step::ConfigureAgent => {
                let Some(handle) = session.as_ref() else {
                    return Err(String::from("no device session is open"));
                };
                let command = artifacts::install_command(&self.plan, &self.staging);
                self.with_retries(step, attempts, || async {
                    let output = self
                        .remote
                        .run_command(handle, &command)
                        .map_err(StepError::Remote)?;
                    if output.is_success() {
                        Ok(())
                    } else {
                        Err(StepError::Install(format!(
                            "install command exited with status {}: {}",
                            describe_exit(output.exit_code),
                            output.stderr.trim()
                        )))
                    }
                })
                .await?;
                Ok(())
            }
            Step::Verify => {
                let Some(handle) = session.as_ref() else {
                    return Err(String::from("no device session is open"));
                };
                let command = artifacts::verify_command(&self.plan);
                self.with_retries(step, attempts, || async {
                    let output = self
                        .remote
                        .run_command(handle, &command)
                        .map_err(StepError::Remote)?;
                    if !output.is_success() {
                        return Err(StepError::Unverified(format!(
                            "{command} exited with status {}",
                            describe_exit(output.exit_code)
                        )));
                    }
                    if output.stdout.contains(&self.plan.verify_pattern) {
                        Ok(())
                    } else {
                        Err(StepError::Unverified(format!(
                            "output did not contain {:?}: {}",
                            self.plan.verify_pattern,
                            output.stdout.trim()
                        )))
                    }
                })
                .await?;
                Ok(())
            }
        }
    }

    async fn connect_with_retries(
        &self,
        step: Step,
        attempts: &Cell<u32>,
    ) -> Result<SessionHandle, String> {
        self.with_retries(step, attempts, || async {
            self.remote.connect().map_err(StepError::Remote)
        })
        .await
    }

    async fn with_retries<T, Op, Fut>(
        &self,
        step: Step,
        attempts: &Cell<u32>,
        operation: Op,
    ) -> Result<T, String>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError<B::Error>>>,
    {
        self.retry
            .execute_observed(operation, StepError::classify, |attempt, error| {
                attempts.set(attempts.get().saturating_add(1));
                self.reporter.on_step_retry(step, attempt, &error.to_string());
            })
            .await
            .map_err(|err| match err {
                RetryError::Fatal { source } => source.to_string(),
                RetryError::Exhausted {
                    attempts: total,
                    source,
                } => format!("exhausted {total} attempts: {source}"),
            })
    }
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}

#[cfg(test)]
mod tests;
