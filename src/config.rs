//! Configuration loading via `ortho-config`.
//!
//! [`CloudConfig`] carries the cloud-side settings: region, resource name
//! overrides, installer locations, retry tuning, and the identifiers of
//! resources created by an earlier run when resuming. Values merge defaults,
//! `tether.toml`, and `TETHER_CLOUD_*` environment variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{CertificateMaterial, DeviceRequest, ExistingResources, KeyMaterial};
use crate::material::{self, MaterialError};
use crate::provision::AgentPlan;
use crate::retry::RetryPolicy;

/// Default source for the root CA bundle installed beside the certificate.
pub const DEFAULT_ROOT_CA_URL: &str = "https://www.amazontrust.com/repository/AmazonRootCA1.pem";

/// Default installation directory for the edge agent.
pub const DEFAULT_AGENT_ROOT: &str = "/opt/edge-agent";

/// Cloud-side configuration loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TETHER_CLOUD",
    discovery(
        app_name = "tether",
        env_var = "TETHER_CONFIG_PATH",
        config_file_name = "tether.toml",
        dotfile_name = ".tether.toml",
        project_file_name = "tether.toml"
    )
)]
pub struct CloudConfig {
    /// AWS region hosting the IoT resources. Required.
    pub region: String,
    /// Override for the derived token exchange role name.
    pub role_name: Option<String>,
    /// Override for the derived role alias name.
    pub role_alias: Option<String>,
    /// Override for the derived device policy name.
    pub device_policy: Option<String>,
    /// Override for the derived token exchange policy name.
    pub exchange_policy: Option<String>,
    /// URL the device downloads the agent installer from. Required.
    pub installer_url: String,
    /// URL the device downloads the root CA bundle from.
    #[ortho_config(default = DEFAULT_ROOT_CA_URL.to_owned())]
    pub root_ca_url: String,
    /// Directory on the device that receives the agent installation.
    #[ortho_config(default = DEFAULT_AGENT_ROOT.to_owned())]
    pub agent_root: String,
    /// Service name the installer registers with the init system.
    #[ortho_config(default = "edge-agent".to_owned())]
    pub agent_service: String,
    /// Override for the verification command run after install. Defaults to
    /// querying the agent service state.
    pub verify_command: Option<String>,
    /// Substring the verification command must print before the run counts
    /// as verified.
    #[ortho_config(default = "active".to_owned())]
    pub verify_pattern: String,
    /// Maximum attempts for each provisioning step.
    #[ortho_config(default = 3)]
    pub retry_max_attempts: u32,
    /// Delay in milliseconds before the first re-attempt.
    #[ortho_config(default = 1_000)]
    pub retry_initial_delay_ms: u64,
    /// Ceiling in milliseconds for the doubled retry delay.
    #[ortho_config(default = 30_000)]
    pub retry_max_delay_ms: u64,
    /// ARN of a token exchange role created by an earlier run.
    pub existing_role_arn: Option<String>,
    /// Thing name registered by an earlier run.
    pub existing_thing_name: Option<String>,
    /// Certificate identifier issued by an earlier run.
    pub existing_certificate_id: Option<String>,
    /// Certificate ARN issued by an earlier run.
    pub existing_certificate_arn: Option<String>,
    /// Path to the certificate PEM saved from an earlier run. Must be
    /// supplied together with `private_key_file`.
    pub certificate_pem_file: Option<String>,
    /// Path to the private key saved from an earlier run.
    pub private_key_file: Option<String>,
    /// Policy names already attached to the certificate by an earlier run.
    pub attached_policies: Option<Vec<String>>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl CloudConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in tether.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("tether")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty or
    /// when resume material is supplied only partially.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.region,
            &FieldMetadata::new("AWS region", "TETHER_CLOUD_REGION", "region", "cloud"),
        )?;
        Self::require_field(
            &self.installer_url,
            &FieldMetadata::new(
                "agent installer URL",
                "TETHER_CLOUD_INSTALLER_URL",
                "installer_url",
                "cloud",
            ),
        )?;
        Self::require_field(
            &self.root_ca_url,
            &FieldMetadata::new(
                "root CA URL",
                "TETHER_CLOUD_ROOT_CA_URL",
                "root_ca_url",
                "cloud",
            ),
        )?;
        Self::require_field(
            &self.agent_root,
            &FieldMetadata::new(
                "agent root directory",
                "TETHER_CLOUD_AGENT_ROOT",
                "agent_root",
                "cloud",
            ),
        )?;
        Self::require_field(
            &self.agent_service,
            &FieldMetadata::new(
                "agent service name",
                "TETHER_CLOUD_AGENT_SERVICE",
                "agent_service",
                "cloud",
            ),
        )?;
        Self::require_field(
            &self.verify_pattern,
            &FieldMetadata::new(
                "verification pattern",
                "TETHER_CLOUD_VERIFY_PATTERN",
                "verify_pattern",
                "cloud",
            ),
        )?;
        self.validate_resume_material()
    }

    fn validate_resume_material(&self) -> Result<(), ConfigError> {
        let has_id = self.existing_certificate_id.is_some();
        let has_arn = self.existing_certificate_arn.is_some();
        let has_pem = self.certificate_pem_file.is_some();
        let has_key = self.private_key_file.is_some();
        let any = has_id || has_arn || has_pem || has_key;
        if any && !(has_id && has_arn && has_pem && has_key) {
            return Err(ConfigError::MissingField(String::from(
                "resuming with a certificate requires existing_certificate_id, \
                 existing_certificate_arn, certificate_pem_file and private_key_file together",
            )));
        }
        Ok(())
    }

    /// Retry policy configured for provisioning steps.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }

    /// Assembles the on-device installation plan from the configured values.
    #[must_use]
    pub fn agent_plan(&self) -> AgentPlan {
        AgentPlan {
            region: self.region.clone(),
            installer_url: self.installer_url.clone(),
            root_ca_url: self.root_ca_url.clone(),
            agent_root: self.agent_root.clone(),
            agent_service: self.agent_service.clone(),
            verify_command: self.verify_command.clone(),
            verify_pattern: self.verify_pattern.clone(),
        }
    }

    /// Builds a [`DeviceRequest`] for `device_name`, loading any resume
    /// certificate material from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails, resume material cannot
    /// be read, or the device name is rejected.
    pub fn device_request(
        &self,
        device_name: &str,
        force_recreate: bool,
    ) -> Result<DeviceRequest, ConfigError> {
        self.validate()?;
        let certificate = self.resume_certificate()?;
        let existing = ExistingResources {
            role_arn: self.existing_role_arn.clone(),
            thing_name: self.existing_thing_name.clone(),
            certificate,
            policy_names: self.attached_policies.clone().unwrap_or_default(),
        };
        DeviceRequest::builder()
            .device_name(device_name)
            .role_name(self.role_name.clone())
            .role_alias(self.role_alias.clone())
            .device_policy(self.device_policy.clone())
            .exchange_policy(self.exchange_policy.clone())
            .existing(existing)
            .force_recreate(force_recreate)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn resume_certificate(&self) -> Result<Option<CertificateMaterial>, ConfigError> {
        let (Some(id), Some(arn), Some(pem_file), Some(key_file)) = (
            self.existing_certificate_id.as_deref(),
            self.existing_certificate_arn.as_deref(),
            self.certificate_pem_file.as_deref(),
            self.private_key_file.as_deref(),
        ) else {
            return Ok(None);
        };
        let pair = material::load_certificate_pair(pem_file, key_file)?;
        Ok(Some(CertificateMaterial {
            certificate_id: id.to_owned(),
            certificate_arn: arn.to_owned(),
            certificate_pem: pair.certificate_pem,
            private_key: KeyMaterial::new(pair.private_key_pem),
        }))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when resume certificate material cannot be loaded.
    #[error(transparent)]
    Material(#[from] MaterialError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
