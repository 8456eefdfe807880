//! Binary entry point for the tether CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use clap::Parser;
use thiserror::Error;

use tether::{
    AwsBackend, CancelToken, CloudConfig, ProgressReporter, Provisioner, RemoteConfig,
    RemoteSession, RunRecord, RunResult, Step, StepState,
};

mod cli;

use cli::{Cli, ProvisionCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("remote session error: {0}")]
    Remote(String),
    #[error("failed to write the run record: {0}")]
    Record(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Provision(command) => provision_command(&command).await,
    }
}

async fn provision_command(args: &ProvisionCommand) -> Result<i32, CliError> {
    #[cfg(feature = "test-backdoors")]
    if let Some(code) = backdoor::intercept(args)? {
        return Ok(code);
    }

    let cloud_config = load_cloud_config()?;
    let remote_config = load_remote_config(args.host.as_deref())?;
    let request = cloud_config
        .device_request(&args.device, args.force_recreate)
        .map_err(|err| CliError::Config(err.to_string()))?;

    let backend = AwsBackend::new(&cloud_config)
        .await
        .map_err(|err| CliError::Backend(err.to_string()))?;
    let session = RemoteSession::with_process_runner(remote_config)
        .map_err(|err| CliError::Remote(err.to_string()))?;

    let cancel = CancelToken::new();
    spawn_cancel_handler(cancel.clone());

    let result = Provisioner::new(backend, session, cloud_config.agent_plan())
        .with_retry_policy(cloud_config.retry_policy())
        .with_cancel_token(cancel)
        .with_reporter(ConsoleReporter)
        .run(&request)
        .await;

    finish_run(args, &result)
}

fn load_cloud_config() -> Result<CloudConfig, CliError> {
    CloudConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))
}

fn load_remote_config(host_override: Option<&str>) -> Result<RemoteConfig, CliError> {
    let mut config =
        RemoteConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(host) = host_override {
        config.host = host.to_owned();
    }
    Ok(config)
}

/// Cancels the run when Ctrl-C arrives; the orchestrator stops before its
/// next step and tears the session down.
fn spawn_cancel_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

/// Renders step progress on stderr, leaving stdout for machine output.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_step_start(&self, step: Step) {
        writeln!(io::stderr(), "{step}: starting").ok();
    }

    fn on_step_retry(&self, step: Step, attempt: u32, message: &str) {
        writeln!(
            io::stderr(),
            "{step}: attempt {attempt} failed, retrying: {message}"
        )
        .ok();
    }

    fn on_step_complete(&self, step: Step, state: &StepState) {
        writeln!(io::stderr(), "{step}: {state}").ok();
    }
}

fn finish_run(args: &ProvisionCommand, result: &RunResult) -> Result<i32, CliError> {
    if let Some(path) = args.record.as_deref() {
        write_record(path, &result.to_record(&args.device))?;
    }

    match result {
        RunResult::Success { .. } => {
            writeln!(io::stdout(), "provisioned {} successfully", args.device).ok();
            Ok(0)
        }
        RunResult::Failure {
            failed,
            reason,
            steps,
            ..
        } => {
            let attempts = steps
                .iter()
                .rev()
                .find(|record| record.step == *failed)
                .map_or(0, |record| record.attempts);
            writeln!(
                io::stderr(),
                "provisioning failed at {failed} after {attempts} attempt(s): {reason}"
            )
            .ok();
            Ok(1)
        }
    }
}

fn write_record(path: &str, record: &RunRecord) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(record).map_err(|err| CliError::Record(err.to_string()))?;
    write_ambient(path, &rendered).map_err(CliError::Record)
}

/// Writes through a capability handle on the containing directory, the same
/// shape the library uses when reading certificate material.
fn write_ambient(path: &str, content: &str) -> Result<(), String> {
    let target = Utf8Path::new(path);
    let (dir_path, file_path) = if target.is_absolute() {
        let parent = target
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {target}"))?;
        let name = target
            .file_name()
            .ok_or_else(|| format!("path has no file name: {target}"))?;
        (parent, Utf8Path::new(name))
    } else {
        (Utf8Path::new("."), target)
    };

    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| format!("cannot open {dir_path}: {err}"))?;
    dir.write(file_path, content.as_bytes())
        .map_err(|err| format!("cannot write {target}: {err}"))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(feature = "test-backdoors")]
mod backdoor {
    //! Environment-driven fake outcomes for CLI behaviour tests.
    //!
    //! Compiled only with the `test-backdoors` feature so release binaries
    //! carry no fake paths. `TETHER_FAKE_PROVISION_ENABLE=1` arms the hook and
    //! `TETHER_FAKE_PROVISION_MODE` picks the outcome; unknown modes fall
    //! through to the real path.

    use std::env;
    use std::io::{self, Write};

    use chrono::Utc;
    use tether::{CloudResourceSet, RunResult, Step, StepRecord};

    use super::{CliError, ProvisionCommand, finish_run, load_cloud_config, load_remote_config};

    pub(crate) fn intercept(args: &ProvisionCommand) -> Result<Option<i32>, CliError> {
        if env::var("TETHER_FAKE_PROVISION_ENABLE").ok().as_deref() != Some("1") {
            return Ok(None);
        }
        let mode =
            env::var("TETHER_FAKE_PROVISION_MODE").unwrap_or_else(|_| String::from("success"));
        match mode.as_str() {
            "success" => finish_run(args, &success(&args.device)).map(Some),
            "verify-failure" => finish_run(args, &verify_failure(&args.device)).map(Some),
            "dump-request" => dump_request(args).map(Some),
            _ => Ok(None),
        }
    }

    fn resources(device: &str) -> CloudResourceSet {
        CloudResourceSet {
            role_arn: Some(format!(
                "arn:aws:iam::000000000000:role/{device}TokenExchangeRole"
            )),
            thing_name: Some(device.to_owned()),
            certificate_id: Some(String::from("fake-certificate")),
            certificate_arn: Some(String::from(
                "arn:aws:iot:eu-west-2:000000000000:cert/fake-certificate",
            )),
            policy_names: vec![
                format!("{device}DevicePolicy"),
                format!("{device}TokenExchangePolicy"),
            ],
            ..CloudResourceSet::default()
        }
    }

    fn success(device: &str) -> RunResult {
        let steps = Step::ALL
            .iter()
            .map(|step| StepRecord::succeeded(*step, 1, Utc::now()))
            .collect();
        RunResult::Success {
            resources: resources(device),
            steps,
        }
    }

    fn verify_failure(device: &str) -> RunResult {
        let reason =
            String::from("exhausted 3 attempts: verification did not confirm the agent is active");
        let mut steps: Vec<StepRecord> = Step::ALL
            .iter()
            .filter(|step| **step != Step::Verify)
            .map(|step| StepRecord::succeeded(*step, 1, Utc::now()))
            .collect();
        steps.push(StepRecord::failed(
            Step::Verify,
            reason.clone(),
            3,
            Some(Utc::now()),
        ));
        RunResult::Failure {
            failed: Step::Verify,
            reason,
            resources: resources(device),
            steps,
        }
    }

    fn dump_request(args: &ProvisionCommand) -> Result<i32, CliError> {
        let cloud_config = load_cloud_config()?;
        let remote_config = load_remote_config(args.host.as_deref())?;
        let request = cloud_config
            .device_request(&args.device, args.force_recreate)
            .map_err(|err| CliError::Config(err.to_string()))?;
        let value = serde_json::json!({
            "device": request.device_name,
            "host": remote_config.host,
            "ssh_user": remote_config.ssh_user,
            "force_recreate": request.force_recreate,
            "role_name": request.role_name,
            "role_alias": request.role_alias,
            "device_policy": request.device_policy,
            "exchange_policy": request.exchange_policy,
        });
        writeln!(io::stdout(), "{value}").ok();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tether::{CloudResourceSet, StepRecord};

    use super::*;

    fn provision_args(record: Option<String>) -> ProvisionCommand {
        ProvisionCommand {
            device: String::from("edge-01"),
            host: None,
            force_recreate: false,
            record,
        }
    }

    fn success_result() -> RunResult {
        RunResult::Success {
            resources: CloudResourceSet {
                thing_name: Some(String::from("edge-01")),
                ..CloudResourceSet::default()
            },
            steps: vec![StepRecord::succeeded(Step::EnsureRole, 1, Utc::now())],
        }
    }

    fn failure_result() -> RunResult {
        RunResult::Failure {
            failed: Step::Verify,
            reason: String::from("exhausted 3 attempts: output did not match"),
            resources: CloudResourceSet::default(),
            steps: vec![StepRecord::failed(
                Step::Verify,
                String::from("output did not match"),
                3,
                None,
            )],
        }
    }

    #[test]
    fn a_successful_run_exits_zero() {
        let code = finish_run(&provision_args(None), &success_result()).expect("finish succeeds");

        assert_eq!(code, 0);
    }

    #[test]
    fn a_failed_run_exits_one() {
        let code = finish_run(&provision_args(None), &failure_result()).expect("finish succeeds");

        assert_eq!(code, 1);
    }

    #[test]
    fn the_record_flag_writes_run_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("record.json");
        let args = provision_args(Some(path.to_string_lossy().into_owned()));

        finish_run(&args, &success_result()).expect("finish succeeds");

        let raw = std::fs::read_to_string(&path).expect("record written");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["device"], "edge-01");
        assert_eq!(value["outcome"], "succeeded");
        assert_eq!(value["steps"][0]["step"], "ensure-role");
    }

    #[test]
    fn the_record_excludes_key_material() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("record.json");
        let args = provision_args(Some(path.to_string_lossy().into_owned()));

        finish_run(&args, &failure_result()).expect("finish succeeds");

        let raw = std::fs::read_to_string(&path).expect("record written");
        assert!(!raw.contains("private_key"), "record: {raw}");
        assert!(!raw.contains("certificate_pem"), "record: {raw}");
    }

    #[test]
    fn record_write_failures_surface_as_cli_errors() {
        let args = provision_args(Some(String::from("/nonexistent-dir/record.json")));

        let err = finish_run(&args, &success_result()).expect_err("write should fail");

        assert!(matches!(err, CliError::Record(_)), "got: {err}");
    }

    #[test]
    fn write_error_renders_one_line_messages() {
        let mut rendered = Vec::new();

        write_error(
            &mut rendered,
            &CliError::Config(String::from("region missing")),
        );

        let text = String::from_utf8(rendered).expect("utf8");
        assert_eq!(text, "configuration error: region missing\n");
    }
}
