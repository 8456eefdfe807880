//! SSH session management for device provisioning.
//!
//! A session is an OpenSSH control master: [`RemoteSession::connect`] starts
//! a background master process bound to a per-run control socket, and later
//! uploads and commands multiplex over that socket instead of negotiating
//! fresh connections. [`RemoteSession::close`] tears the master down; callers
//! own the close-exactly-once discipline.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use uuid::Uuid;

mod config;
mod error;
mod types;
mod util;

pub use config::{DEFAULT_CONTROL_DIR, RemoteConfig, RemoteConfigLoadError};
pub use error::RemoteError;
pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, SessionHandle,
};
pub use util::expand_tilde;

/// Exit code the OpenSSH client reserves for its own transport failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Executes uploads and commands on a device over a multiplexed SSH session.
#[derive(Clone, Debug)]
pub struct RemoteSession<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
}

impl RemoteSession<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteSession<R> {
    /// Creates a new session service using the provided runner and
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: RemoteConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Establishes a control master and returns the handle operations go
    /// through.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::AuthenticationRejected`] or
    /// [`RemoteError::HostUnresolvable`] for failures retrying cannot fix,
    /// and [`RemoteError::Unreachable`] or [`RemoteError::Transport`] for
    /// transient transport faults.
    pub fn connect(&self) -> Result<SessionHandle, RemoteError> {
        let control_path = Utf8PathBuf::from(&self.config.control_dir)
            .join(format!("tether-{}.sock", Uuid::new_v4().simple()));

        let mut args = self.common_ssh_options();
        args.push(OsString::from("-o"));
        args.push(OsString::from("ControlMaster=yes"));
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!("ControlPath={control_path}")));
        args.push(OsString::from("-f"));
        args.push(OsString::from("-N"));
        args.push(OsString::from(self.destination()));

        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        match output.code {
            Some(0) => Ok(SessionHandle {
                user: self.config.ssh_user.clone(),
                host: self.config.host.clone(),
                port: self.config.ssh_port,
                control_path,
            }),
            Some(_) => Err(RemoteError::from_transport_stderr(&output.stderr)),
            None => Err(RemoteError::MissingExitCode {
                program: self.config.ssh_bin.clone(),
            }),
        }
    }

    /// Executes `command` on the device and returns its exit code and output.
    ///
    /// The client's own exit code 255 is surfaced as a transport error; any
    /// other exit code belongs to the remote command and is returned in the
    /// output, not as an error.
    ///
    /// # Errors
    ///
    /// Returns a classified [`RemoteError`] when the transport fails.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; callers must escape
    /// any untrusted input before invoking this method.
    pub fn run_command(
        &self,
        session: &SessionHandle,
        command: &str,
    ) -> Result<RemoteCommandOutput, RemoteError> {
        let args = self.session_args(session, Some(command));
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        match output.code {
            Some(SSH_TRANSPORT_EXIT) => Err(RemoteError::from_transport_stderr(&output.stderr)),
            Some(_) => Ok(RemoteCommandOutput {
                exit_code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            None => Err(RemoteError::MissingExitCode {
                program: self.config.ssh_bin.clone(),
            }),
        }
    }

    /// Streams `bytes` to `remote_path` on the device and applies `mode`.
    ///
    /// Parent directories are created as needed and an existing file is
    /// overwritten. A failed transfer leaves no usable partial state; callers
    /// retry the whole upload.
    ///
    /// # Errors
    ///
    /// Returns a classified [`RemoteError`] when the transport fails and
    /// [`RemoteError::UploadRejected`] when the device's shell refuses the
    /// write.
    pub fn upload(
        &self,
        session: &SessionHandle,
        bytes: &[u8],
        remote_path: &str,
        mode: &str,
    ) -> Result<(), RemoteError> {
        let command = build_upload_command(remote_path, mode);
        let args = self.session_args(session, Some(&command));
        let output = self
            .runner
            .run_with_stdin(&self.config.ssh_bin, &args, bytes)?;
        match output.code {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_EXIT) => Err(RemoteError::from_transport_stderr(&output.stderr)),
            Some(_) => Err(RemoteError::UploadRejected {
                path: remote_path.to_owned(),
                message: output.stderr.trim().to_owned(),
            }),
            None => Err(RemoteError::MissingExitCode {
                program: self.config.ssh_bin.clone(),
            }),
        }
    }

    /// Stops the control master behind `session`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] when the master refuses the stop
    /// request.
    pub fn close(&self, session: &SessionHandle) -> Result<(), RemoteError> {
        let args = vec![
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", session.control_path)),
            OsString::from("-O"),
            OsString::from("exit"),
            OsString::from(session.destination()),
        ];
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        match output.code {
            Some(0) => Ok(()),
            Some(_) => Err(RemoteError::from_transport_stderr(&output.stderr)),
            None => Err(RemoteError::MissingExitCode {
                program: self.config.ssh_bin.clone(),
            }),
        }
    }

    // ControlMaster=auto lets a per-command invocation become the master when
    // the shared socket has died, so a retried command reconnects on its own.
    fn session_args(&self, session: &SessionHandle, command: Option<&str>) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", session.control_path)),
            OsString::from("-o"),
            OsString::from("ControlMaster=auto"),
        ];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(session.destination()));
        if let Some(remote_command) = command {
            args.push(OsString::from(remote_command));
        }
        args
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.ssh_port.to_string()),
        ];

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));

        args
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.ssh_user, self.config.host)
    }
}

/// Renders the remote shell line that receives an uploaded file.
fn build_upload_command(remote_path: &str, mode: &str) -> String {
    let escaped_path = escape(remote_path.into());
    let escaped_mode = escape(mode.into());
    let parent = Utf8Path::new(remote_path)
        .parent()
        .filter(|dir| !dir.as_str().is_empty() && *dir != Utf8Path::new("/"));

    parent.map_or_else(
        || format!("cat > {escaped_path} && chmod {escaped_mode} {escaped_path}"),
        |dir| {
            format!(
                "mkdir -p {} && cat > {escaped_path} && chmod {escaped_mode} {escaped_path}",
                escape(dir.as_str().into())
            )
        },
    )
}

#[cfg(test)]
mod tests;
