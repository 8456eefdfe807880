//! Error type and failure classification for device sessions.

use thiserror::Error;

use crate::retry::{ClassifyError, ErrorClass};

/// Errors raised while talking to a device over SSH.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the SSH client cannot be started or fed input.
    #[error("failed to run {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when configuration is missing required values. The error message
    /// includes guidance on how to provide the value via environment variable
    /// or configuration file.
    #[error("missing {field}: set TETHER_REMOTE_{env_suffix} or add {field} to [remote] in tether.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the device rejects authentication or host trust fails.
    #[error("device rejected authentication: {message}")]
    AuthenticationRejected {
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the host name cannot be resolved.
    #[error("device host could not be resolved: {message}")]
    HostUnresolvable {
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the device cannot be reached (refused, timed out, reset).
    #[error("device unreachable: {message}")]
    Unreachable {
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the SSH transport fails for an unrecognised reason.
    #[error("ssh transport failed: {message}")]
    Transport {
        /// Stderr reported by the SSH client.
        message: String,
    },
    /// Raised when the device rejects an uploaded file (permissions, disk).
    #[error("device rejected upload to {path}: {message}")]
    UploadRejected {
        /// Remote path the upload targeted.
        path: String,
        /// Stderr reported by the remote shell.
        message: String,
    },
    /// Raised when the SSH client terminates without an exit status.
    #[error("{program} terminated without an exit status")]
    MissingExitCode {
        /// Program that terminated abnormally.
        program: String,
    },
}

impl RemoteError {
    /// Maps an SSH transport failure's stderr to the matching error variant.
    ///
    /// Authentication and name-resolution failures cannot be fixed by
    /// retrying; everything else on the transport is treated as reachable
    /// noise worth another attempt.
    #[must_use]
    pub fn from_transport_stderr(stderr: &str) -> Self {
        let message = condense(stderr);
        let lowered = message.to_lowercase();

        const AUTH_MARKERS: [&str; 4] = [
            "permission denied",
            "host key verification failed",
            "too many authentication failures",
            "no such identity",
        ];
        const RESOLVE_MARKERS: [&str; 2] =
            ["could not resolve hostname", "name or service not known"];
        const UNREACHABLE_MARKERS: [&str; 7] = [
            "connection refused",
            "timed out",
            "connection reset",
            "connection closed",
            "broken pipe",
            "network is unreachable",
            "no route to host",
        ];

        if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return Self::AuthenticationRejected { message };
        }
        if RESOLVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return Self::HostUnresolvable { message };
        }
        if UNREACHABLE_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            return Self::Unreachable { message };
        }
        Self::Transport { message }
    }
}

impl ClassifyError for RemoteError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Spawn { .. }
            | Self::InvalidConfig { .. }
            | Self::AuthenticationRejected { .. }
            | Self::HostUnresolvable { .. }
            | Self::UploadRejected { .. } => ErrorClass::Fatal,
            Self::Unreachable { .. } | Self::Transport { .. } | Self::MissingExitCode { .. } => {
                ErrorClass::Transient
            }
        }
    }
}

/// Collapses multi-line client output into a single operator-facing line.
fn condense(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::from("no diagnostic output");
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
