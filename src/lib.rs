//! Core library for the tether device provisioning tool.
//!
//! The crate exposes a backend abstraction for a device's cloud identity
//! (role, thing, certificate and policies), an AWS implementation of it, and
//! an orchestrator that provisions the identity, installs the edge agent over
//! SSH and verifies the agent is running. Runs are resumable: steps whose
//! outputs already exist are skipped, and a failed run reports exactly where
//! it stopped.

pub mod aws;
pub mod backend;
pub mod config;
pub mod janitor;
pub mod material;
pub mod provision;
pub mod remote;
pub mod retry;
pub mod test_support;

pub use aws::{AwsBackend, AwsBackendError};
pub use backend::{
    BackendError, CertificateMaterial, CleanupBackend, DeviceRequest, DeviceRequestBuilder,
    EndpointSet, ExistingResources, IdentityBackend, KeyMaterial, ThingIdentity,
};
pub use config::{CloudConfig, ConfigError};
pub use janitor::{DecommissionSummary, Janitor, JanitorConfig, JanitorError};
pub use material::{CertificatePair, MaterialError, load_certificate_pair};
pub use provision::{
    AgentPlan, CancelToken, CloudResourceSet, NullReporter, ProgressReporter, Provisioner,
    RecordedResources, RunRecord, RunResult, Step, StepRecord, StepState,
};
pub use remote::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RemoteConfig,
    RemoteConfigLoadError, RemoteError, RemoteSession, SessionHandle,
};
pub use retry::{ClassifyError, ErrorClass, RetryError, RetryPolicy};
