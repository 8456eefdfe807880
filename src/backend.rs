//! Backend abstraction for cloud identity resources.
//!
//! Provisioning a device needs an IAM role (with an IoT role alias), an IoT
//! thing, an active certificate with its key pair, and the policies attached
//! to that certificate. The [`IdentityBackend`] trait is the seam between the
//! orchestrator and the provider; production uses the AWS implementation and
//! tests substitute scripted doubles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::retry::ClassifyError;

/// Maximum length accepted for a device name (the IoT thing name limit).
const MAX_DEVICE_NAME_LEN: usize = 128;

/// Derives the conventional IAM role name for a device.
#[must_use]
pub fn token_exchange_role_name(device_name: &str) -> String {
    format!("{device_name}TokenExchangeRole")
}

/// Derives the conventional IoT role alias name for a device.
#[must_use]
pub fn token_exchange_alias_name(device_name: &str) -> String {
    format!("{device_name}TokenExchangeAlias")
}

/// Derives the conventional IoT policy name granting device connectivity.
#[must_use]
pub fn device_policy_name(device_name: &str) -> String {
    format!("{device_name}DevicePolicy")
}

/// Derives the conventional IoT policy name granting credential exchange.
#[must_use]
pub fn token_exchange_policy_name(device_name: &str) -> String {
    format!("{device_name}TokenExchangePolicy")
}

/// Private key material held in memory for the lifetime of a run.
///
/// The wrapper keeps the key out of `Debug` output and deliberately
/// implements no serialisation; the only way out is [`KeyMaterial::pem`].
#[derive(Clone, Eq, PartialEq)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    /// Wraps PEM-encoded private key text.
    #[must_use]
    pub const fn new(pem: String) -> Self {
        Self(pem)
    }

    /// Borrows the PEM text for upload to the device.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([redacted])")
    }
}

impl From<String> for KeyMaterial {
    fn from(pem: String) -> Self {
        Self::new(pem)
    }
}

/// A device certificate together with its private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateMaterial {
    /// Provider identifier for the certificate.
    pub certificate_id: String,
    /// Full ARN of the certificate (the policy attachment target).
    pub certificate_arn: String,
    /// PEM-encoded certificate.
    pub certificate_pem: String,
    /// PEM-encoded private key, never logged or serialised.
    pub private_key: KeyMaterial,
}

/// Identity resources bound to a thing after [`IdentityBackend::ensure_thing_identity`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThingIdentity {
    /// Registered thing name.
    pub thing_name: String,
    /// Certificate attached to the thing as a principal.
    pub certificate: CertificateMaterial,
}

/// IoT endpoints a provisioned device talks to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointSet {
    /// Data-plane (MQTT over TLS) endpoint address.
    pub data_endpoint: String,
    /// Credentials-provider endpoint address used for role alias exchange.
    pub credentials_endpoint: String,
}

/// Previously created resources supplied when resuming a failed run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExistingResources {
    /// ARN of an already-created token exchange role.
    pub role_arn: Option<String>,
    /// Name of an already-registered thing.
    pub thing_name: Option<String>,
    /// Certificate material issued by an earlier run.
    pub certificate: Option<CertificateMaterial>,
    /// Policy names already attached to the certificate.
    pub policy_names: Vec<String>,
}

impl ExistingResources {
    /// Returns `true` when no resume state was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.role_arn.is_none()
            && self.thing_name.is_none()
            && self.certificate.is_none()
            && self.policy_names.is_empty()
    }
}

/// Parameters describing the device identity to provision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceRequest {
    /// Device name; doubles as the IoT thing name.
    pub device_name: String,
    /// IAM role assumed by the device via the role alias.
    pub role_name: String,
    /// IoT role alias pointing at `role_name`.
    pub role_alias: String,
    /// IoT policy granting connect/publish/subscribe/receive.
    pub device_policy: String,
    /// IoT policy granting `iot:AssumeRoleWithCertificate` on the alias.
    pub exchange_policy: String,
    /// Resources carried over from an earlier run, if any.
    pub existing: ExistingResources,
    /// Ignore `existing` and provision everything afresh.
    pub force_recreate: bool,
}

impl DeviceRequest {
    /// Starts a builder for a [`DeviceRequest`].
    #[must_use]
    pub fn builder() -> DeviceRequestBuilder {
        DeviceRequestBuilder::new()
    }

    /// Policy names this request attaches to the device certificate.
    #[must_use]
    pub fn policy_names(&self) -> [&str; 2] {
        [self.device_policy.as_str(), self.exchange_policy.as_str()]
    }

    /// Validates the request, returning a descriptive error when a field is
    /// missing or the device name is not a legal thing name.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidDeviceName`] for an illegal device name
    /// and [`BackendError::Validation`] when any derived name is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        validate_device_name(&self.device_name)?;
        if self.role_name.is_empty() {
            return Err(BackendError::Validation("role_name".to_owned()));
        }
        if self.role_alias.is_empty() {
            return Err(BackendError::Validation("role_alias".to_owned()));
        }
        if self.device_policy.is_empty() {
            return Err(BackendError::Validation("device_policy".to_owned()));
        }
        if self.exchange_policy.is_empty() {
            return Err(BackendError::Validation("exchange_policy".to_owned()));
        }
        Ok(())
    }
}

fn validate_device_name(name: &str) -> Result<(), BackendError> {
    if name.is_empty() || name.len() > MAX_DEVICE_NAME_LEN {
        return Err(BackendError::InvalidDeviceName {
            name: name.to_owned(),
        });
    }
    let legal = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':'));
    if legal {
        Ok(())
    } else {
        Err(BackendError::InvalidDeviceName {
            name: name.to_owned(),
        })
    }
}

/// Builder for [`DeviceRequest`] that trims inputs, derives conventional
/// resource names for anything left unset, and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceRequestBuilder {
    device_name: String,
    role_name: Option<String>,
    role_alias: Option<String>,
    device_policy: Option<String>,
    exchange_policy: Option<String>,
    existing: ExistingResources,
    force_recreate: bool,
}

impl DeviceRequestBuilder {
    /// Creates an empty builder; the device name must be populated before
    /// build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the device name.
    #[must_use]
    pub fn device_name(mut self, value: impl Into<String>) -> Self {
        self.device_name = value.into();
        self
    }

    /// Overrides the derived IAM role name.
    #[must_use]
    pub fn role_name(mut self, value: Option<String>) -> Self {
        self.role_name = value;
        self
    }

    /// Overrides the derived role alias name.
    #[must_use]
    pub fn role_alias(mut self, value: Option<String>) -> Self {
        self.role_alias = value;
        self
    }

    /// Overrides the derived device policy name.
    #[must_use]
    pub fn device_policy(mut self, value: Option<String>) -> Self {
        self.device_policy = value;
        self
    }

    /// Overrides the derived token exchange policy name.
    #[must_use]
    pub fn exchange_policy(mut self, value: Option<String>) -> Self {
        self.exchange_policy = value;
        self
    }

    /// Supplies resources carried over from an earlier run.
    #[must_use]
    pub fn existing(mut self, value: ExistingResources) -> Self {
        self.existing = value;
        self
    }

    /// Requests fresh resources even when resume state is present.
    #[must_use]
    pub const fn force_recreate(mut self, value: bool) -> Self {
        self.force_recreate = value;
        self
    }

    /// Builds and validates the [`DeviceRequest`].
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidDeviceName`] or
    /// [`BackendError::Validation`] when the trimmed inputs are not usable.
    pub fn build(self) -> Result<DeviceRequest, BackendError> {
        let device_name = self.device_name.trim().to_owned();
        let named = |override_value: Option<String>, derive: fn(&str) -> String| {
            override_value
                .map(|value| value.trim().to_owned())
                .unwrap_or_else(|| derive(&device_name))
        };
        let request = DeviceRequest {
            role_name: named(self.role_name, token_exchange_role_name),
            role_alias: named(self.role_alias, token_exchange_alias_name),
            device_policy: named(self.device_policy, device_policy_name),
            exchange_policy: named(self.exchange_policy, token_exchange_policy_name),
            device_name,
            existing: self.existing,
            force_recreate: self.force_recreate,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised while assembling backend requests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the device name cannot be used as a thing name.
    #[error(
        "device name '{name}' must be 1-128 characters from A-Z, a-z, 0-9, '-', '_' or ':'"
    )]
    InvalidDeviceName {
        /// The rejected name.
        name: String,
    },
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by cloud identity backends.
///
/// Implementations classify their failures through the error type and never
/// retry internally; retries and run-level decisions belong to the caller.
pub trait IdentityBackend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + ClassifyError + Send + Sync + 'static;

    /// Ensures the token exchange role and its role alias exist, returning
    /// the role ARN. Idempotent: an existing role is returned, not recreated.
    fn ensure_role<'a>(
        &'a self,
        request: &'a DeviceRequest,
    ) -> BackendFuture<'a, String, Self::Error>;

    /// Cheap existence probe for a role, used when resuming a run.
    fn role_exists<'a>(&'a self, role_name: &'a str) -> BackendFuture<'a, bool, Self::Error>;

    /// Ensures the thing exists and issues a fresh active certificate bound
    /// to it. The private key is returned once and held only in memory.
    fn ensure_thing_identity<'a>(
        &'a self,
        request: &'a DeviceRequest,
    ) -> BackendFuture<'a, ThingIdentity, Self::Error>;

    /// Cheap existence probe for a thing, used when resuming a run.
    fn thing_exists<'a>(&'a self, thing_name: &'a str) -> BackendFuture<'a, bool, Self::Error>;

    /// Ensures the request's policies exist and are attached to the
    /// certificate, returning the attached policy names. Attaching an
    /// already-attached policy is a no-op.
    fn attach_policies<'a>(
        &'a self,
        request: &'a DeviceRequest,
        certificate_arn: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error>;

    /// Looks up the data-plane and credentials-provider endpoints.
    fn describe_endpoints(&self) -> BackendFuture<'_, EndpointSet, Self::Error>;
}

/// Interface for removing a device's cloud identity resources.
///
/// Every operation tolerates an already-absent resource so a decommission
/// sweep can be re-run after a partial failure.
pub trait CleanupBackend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists the certificate ARNs attached to a thing as principals.
    fn thing_principals<'a>(
        &'a self,
        thing_name: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error>;

    /// Detaches a certificate principal from a thing.
    fn detach_thing_principal<'a>(
        &'a self,
        thing_name: &'a str,
        principal_arn: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Lists the policy names attached to a certificate.
    fn certificate_policies<'a>(
        &'a self,
        certificate_arn: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error>;

    /// Detaches a policy from a certificate.
    fn detach_policy<'a>(
        &'a self,
        policy_name: &'a str,
        target_arn: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Marks a certificate inactive ahead of deletion.
    fn deactivate_certificate<'a>(
        &'a self,
        certificate_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes an inactive certificate.
    fn delete_certificate<'a>(
        &'a self,
        certificate_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes an IoT policy once nothing references it.
    fn delete_policy<'a>(&'a self, policy_name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes a thing once its principals are detached.
    fn delete_thing<'a>(&'a self, thing_name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Deletes the IoT role alias for a device.
    fn delete_role_alias<'a>(&'a self, alias_name: &'a str)
    -> BackendFuture<'a, (), Self::Error>;

    /// Deletes the token exchange role for a device.
    fn delete_role<'a>(&'a self, role_name: &'a str) -> BackendFuture<'a, (), Self::Error>;
}
