//! Provisioning steps and their audit records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stage of the provisioning workflow, in execution order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Ensure the token exchange role and its alias exist.
    EnsureRole,
    /// Ensure the thing exists with an active certificate attached.
    EnsureIdentity,
    /// Ensure the device policies exist and are attached to the certificate.
    AttachPolicies,
    /// Open the shared connection to the device.
    Connect,
    /// Upload certificate material and agent configuration.
    UploadArtifacts,
    /// Install and enable the agent on the device.
    ConfigureAgent,
    /// Confirm the agent reports itself healthy.
    Verify,
}

impl Step {
    /// Every step in the order the orchestrator runs them.
    pub const ALL: [Self; 7] = [
        Self::EnsureRole,
        Self::EnsureIdentity,
        Self::AttachPolicies,
        Self::Connect,
        Self::UploadArtifacts,
        Self::ConfigureAgent,
        Self::Verify,
    ];

    /// Stable name used in reports and run records.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EnsureRole => "ensure-role",
            Self::EnsureIdentity => "ensure-identity",
            Self::AttachPolicies => "attach-policies",
            Self::Connect => "connect",
            Self::UploadArtifacts => "upload-artifacts",
            Self::ConfigureAgent => "configure-agent",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State a step can be in during and after a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum StepState {
    /// Not yet reached.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Stopped with the given reason.
    Failed(String),
    /// Not run because its outputs already exist.
    Skipped,
}

impl StepState {
    /// Whether the state is one a record may end in.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Skipped)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Audit record for one step of a run.
///
/// Records are appended in execution order and never mutated once their state
/// is terminal.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StepRecord {
    /// Step the record describes.
    pub step: Step,
    /// Terminal state the step reached.
    #[serde(flatten)]
    pub state: StepState,
    /// Attempts consumed, zero for skipped steps.
    pub attempts: u32,
    /// When the step started running, absent for skipped steps.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached its terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Record for a step that completed successfully.
    #[must_use]
    pub fn succeeded(step: Step, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            step,
            state: StepState::Succeeded,
            attempts,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// Record for a step that failed and halted the run.
    #[must_use]
    pub fn failed(
        step: Step,
        reason: String,
        attempts: u32,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            step,
            state: StepState::Failed(reason),
            attempts,
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    /// Record for a step whose outputs already existed.
    #[must_use]
    pub fn skipped(step: Step) -> Self {
        Self {
            step,
            state: StepState::Skipped,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}
