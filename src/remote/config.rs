//! Device connection configuration and validation.
//!
//! This module defines [`RemoteConfig`] for SSH settings, loaded via
//! `ortho-config` which merges defaults, configuration files, and
//! environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::error::RemoteError;

/// Default directory receiving control master sockets.
pub const DEFAULT_CONTROL_DIR: &str = "/tmp";

/// SSH connection settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TETHER_REMOTE",
    discovery(
        app_name = "tether",
        env_var = "TETHER_CONFIG_PATH",
        config_file_name = "tether.toml",
        dotfile_name = ".tether.toml",
        project_file_name = "tether.toml"
    )
)]
pub struct RemoteConfig {
    /// Host name or address of the device to provision. Required.
    pub host: String,
    /// Remote user to connect as.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// TCP port the device's SSH daemon listens on.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; defaults to disabling because
    /// freshly imaged devices present unknown keys.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for fresh devices.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key file for remote authentication. Supports
    /// tilde expansion (`~/.ssh/id_ed25519`). Optional; when not provided, SSH
    /// falls back to default key locations. Validation rejects empty or
    /// whitespace-only values.
    pub ssh_identity_file: Option<String>,
    /// Seconds the SSH client waits for the TCP connection.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u32,
    /// Directory receiving control master sockets.
    #[ortho_config(default = DEFAULT_CONTROL_DIR.to_owned())]
    pub control_dir: String,
}

/// Errors raised when loading the remote configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("remote configuration parsing failed: {0}")]
    Parse(String),
}

impl RemoteConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when any required field is empty.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.host, "host")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.control_dir, "control_dir")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        if value.trim().is_empty() {
            return Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            None => Ok(()), // Not configured; SSH uses defaults
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("tether")])
            .map_err(|err| RemoteConfigLoadError::Parse(err.to_string()))
    }
}
