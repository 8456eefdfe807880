//! AWS identity backend.
//!
//! Implements the provisioning and cleanup seams against IAM and IoT Core.
//! Every `ensure_*` operation is idempotent: it reuses a resource that
//! already exists and treats a creation race as success, so a re-run
//! converges on the same set of resources instead of duplicating them.
//!
//! Credentials come from the SDK's default provider chain (environment,
//! shared profile, instance metadata); only the region is taken from the
//! tool's own configuration.

mod cleanup;
mod endpoints;
mod error;
mod policy;
mod role;
mod thing;

pub use error::AwsBackendError;

use aws_config::{BehaviorVersion, Region};

use crate::backend::{BackendFuture, DeviceRequest, EndpointSet, IdentityBackend, ThingIdentity};
use crate::config::CloudConfig;

/// Identity backend backed by the AWS IAM and IoT Core control planes.
pub struct AwsBackend {
    iam: aws_sdk_iam::Client,
    iot: aws_sdk_iot::Client,
    region: String,
}

impl AwsBackend {
    /// Builds a backend for the configured region.
    ///
    /// The backend consumes only the region; callers that provision validate
    /// the rest of the configuration when assembling the request.
    ///
    /// # Errors
    ///
    /// Returns [`AwsBackendError::Config`] when no region is configured.
    pub async fn new(config: &CloudConfig) -> Result<Self, AwsBackendError> {
        let region = config.region.trim();
        if region.is_empty() {
            return Err(AwsBackendError::Config(String::from(
                "AWS region is required: set TETHER_CLOUD_REGION or add region to tether.toml",
            )));
        }
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Ok(Self {
            iam: aws_sdk_iam::Client::new(&sdk_config),
            iot: aws_sdk_iot::Client::new(&sdk_config),
            region: region.to_owned(),
        })
    }

    /// Region the backend talks to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl IdentityBackend for AwsBackend {
    type Error = AwsBackendError;

    fn ensure_role<'a>(
        &'a self,
        request: &'a DeviceRequest,
    ) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let role_arn = self.ensure_exchange_role(&request.role_name).await?;
            self.ensure_role_alias(&request.role_alias, &role_arn)
                .await?;
            Ok(role_arn)
        })
    }

    fn role_exists<'a>(&'a self, role_name: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move { Ok(self.lookup_role_arn(role_name).await?.is_some()) })
    }

    fn ensure_thing_identity<'a>(
        &'a self,
        request: &'a DeviceRequest,
    ) -> BackendFuture<'a, ThingIdentity, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let thing_name = self.ensure_thing(&request.device_name).await?;
            let certificate = match request.existing.certificate.as_ref() {
                Some(supplied) if !request.force_recreate => supplied.clone(),
                _ => self.issue_certificate().await?,
            };
            self.attach_certificate(&thing_name, &certificate.certificate_arn)
                .await?;
            Ok(ThingIdentity {
                thing_name,
                certificate,
            })
        })
    }

    fn thing_exists<'a>(&'a self, thing_name: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move { self.thing_is_registered(thing_name).await })
    }

    fn attach_policies<'a>(
        &'a self,
        request: &'a DeviceRequest,
        certificate_arn: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let alias_arn = self.role_alias_arn(&request.role_alias).await?.ok_or_else(|| {
                AwsBackendError::NotFound {
                    operation: "DescribeRoleAlias",
                    message: format!(
                        "role alias {} is not registered; the role step creates it",
                        request.role_alias
                    ),
                }
            })?;
            self.ensure_policy(&request.device_policy, &policy::device_policy_document())
                .await?;
            self.ensure_policy(
                &request.exchange_policy,
                &policy::exchange_policy_document(&alias_arn),
            )
            .await?;
            for policy_name in request.policy_names() {
                self.attach_policy_to_target(policy_name, certificate_arn)
                    .await?;
            }
            Ok(request.policy_names().map(str::to_owned).to_vec())
        })
    }

    fn describe_endpoints(&self) -> BackendFuture<'_, EndpointSet, Self::Error> {
        Box::pin(async move {
            let data_endpoint = self.endpoint_address(endpoints::DATA_ENDPOINT_TYPE).await?;
            let credentials_endpoint = self
                .endpoint_address(endpoints::CREDENTIALS_ENDPOINT_TYPE)
                .await?;
            Ok(EndpointSet {
                data_endpoint,
                credentials_endpoint,
            })
        })
    }
}
