//! Shared fixtures for provision CLI behavioural scenarios.

use std::process::Output;
use std::sync::{Arc, LazyLock};

use escargot::CargoBuild;
use rstest::fixture;
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub struct CliOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CliOutput {
    pub fn from_process_output(output: Output) -> Self {
        let Output {
            status,
            stdout: raw_stdout,
            stderr: raw_stderr,
        } = output;
        let status_code = status.code().unwrap_or(1);
        let stdout = String::from_utf8_lossy(&raw_stdout).into_owned();
        let stderr = String::from_utf8_lossy(&raw_stderr).into_owned();
        Self {
            status_code,
            stdout,
            stderr,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CliContext {
    pub fake_mode: Option<String>,
    pub extra_env: Vec<(String, String)>,
    pub record_path: Option<String>,
    pub record_tmp: Option<Arc<TempDir>>,
    pub output: Option<CliOutput>,
}

#[expect(
    clippy::expect_used,
    reason = "test setup requires panic on build failure"
)]
static TETHER_BIN: LazyLock<escargot::CargoRun> = LazyLock::new(|| {
    CargoBuild::new()
        .bin("tether")
        .features("test-backdoors")
        .run()
        .expect("failed to build tether with test-backdoors feature")
});

pub fn tether_cmd() -> assert_cmd::Command {
    TETHER_BIN.command().into()
}

impl CliContext {
    /// Base command with the fake hook armed and enough configuration for
    /// request dumping to assemble a request without cloud access.
    pub fn base_command(&self) -> assert_cmd::Command {
        let mut cmd = tether_cmd();
        cmd.env("TETHER_FAKE_PROVISION_ENABLE", "1");
        if let Some(mode) = self.fake_mode.as_deref() {
            cmd.env("TETHER_FAKE_PROVISION_MODE", mode);
        }
        cmd.env("TETHER_CLOUD_REGION", "eu-west-2");
        cmd.env(
            "TETHER_CLOUD_INSTALLER_URL",
            "https://example.com/agent/install.sh",
        );
        cmd.env("TETHER_REMOTE_HOST", "203.0.113.10");
        for (key, value) in &self.extra_env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[fixture]
pub fn cli_context() -> CliContext {
    CliContext::default()
}
