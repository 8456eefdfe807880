//! BDD step definitions for the provision CLI.

use rstest_bdd_macros::{given, then, when};
use tempfile::TempDir;

use super::test_helpers::{CliContext, CliOutput};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("failed to execute tether command: {0}")]
    Execution(String),
    #[error("failed to prepare the record directory: {0}")]
    RecordDir(String),
}

fn execute_provision(
    mut cli_context: CliContext,
    device: &str,
    additional_args: &[&str],
) -> Result<CliContext, StepError> {
    let mut cmd = cli_context.base_command();
    cmd.args(["provision", device]);
    cmd.args(additional_args);
    let output = cmd
        .output()
        .map_err(|err| StepError::Execution(err.to_string()))?;
    cli_context.output = Some(CliOutput::from_process_output(output));
    Ok(cli_context)
}

fn captured_output(cli_context: &CliContext) -> Result<&CliOutput, StepError> {
    cli_context
        .output
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing command output")))
}

#[given("fake request dumping is enabled")]
fn fake_dumping_enabled(mut cli_context: CliContext) -> CliContext {
    cli_context.fake_mode = Some(String::from("dump-request"));
    cli_context
}

#[given("a fake provisioning outcome of \"{mode}\"")]
fn fake_outcome(mut cli_context: CliContext, mode: String) -> CliContext {
    cli_context.fake_mode = Some(mode.trim().to_owned());
    cli_context
}

#[given("the configured role name is \"{name}\"")]
fn configured_role_name(mut cli_context: CliContext, name: String) -> CliContext {
    cli_context
        .extra_env
        .push((String::from("TETHER_CLOUD_ROLE_NAME"), name.trim().to_owned()));
    cli_context
}

#[when("I provision device \"{device}\"")]
fn provision_device(cli_context: CliContext, device: String) -> Result<CliContext, StepError> {
    execute_provision(cli_context, device.trim(), &[])
}

#[when("using host \"{host}\" I provision device \"{device}\"")]
fn provision_device_with_host(
    cli_context: CliContext,
    host: String,
    device: String,
) -> Result<CliContext, StepError> {
    execute_provision(cli_context, device.trim(), &["--host", host.trim()])
}

#[when("I provision device \"{device}\" writing a run record")]
fn provision_device_with_record(
    mut cli_context: CliContext,
    device: String,
) -> Result<CliContext, StepError> {
    let tmp = TempDir::new().map_err(|err| StepError::RecordDir(err.to_string()))?;
    let path = tmp.path().join("record.json");
    let path_string = path
        .to_str()
        .ok_or_else(|| StepError::RecordDir(String::from("non-utf8 record path")))?
        .to_owned();
    cli_context.record_path = Some(path_string.clone());
    cli_context.record_tmp = Some(std::sync::Arc::new(tmp));
    execute_provision(cli_context, device.trim(), &["--record", &path_string])
}

#[then("the command succeeds")]
fn command_succeeds(cli_context: &CliContext) -> Result<(), StepError> {
    let output = captured_output(cli_context)?;
    if output.status_code == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected success, got exit code {}: {}",
            output.status_code, output.stderr
        )))
    }
}

#[then("the command fails")]
fn command_fails(cli_context: &CliContext) -> Result<(), StepError> {
    let output = captured_output(cli_context)?;
    if output.status_code == 0 {
        Err(StepError::Assertion(format!(
            "expected failure, got success: {}",
            output.stdout
        )))
    } else {
        Ok(())
    }
}

#[then("the dumped request field \"{key}\" is \"{value}\"")]
fn dumped_request_field(
    cli_context: &CliContext,
    key: String,
    value: String,
) -> Result<(), StepError> {
    let output = captured_output(cli_context)?;
    let dumped: serde_json::Value = serde_json::from_str(output.stdout.trim()).map_err(|err| {
        StepError::Assertion(format!(
            "stdout is not a request dump ({err}): {}",
            output.stdout
        ))
    })?;
    let actual = dumped
        .get(key.trim())
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            StepError::Assertion(format!("dump has no string field {key}: {dumped}"))
        })?;
    if actual == value.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {key} to be {value}, got {actual}"
        )))
    }
}

#[then("the standard output mentions \"{snippet}\"")]
fn stdout_mentions(cli_context: &CliContext, snippet: String) -> Result<(), StepError> {
    let output = captured_output(cli_context)?;
    if output.stdout.contains(snippet.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "stdout missing {snippet:?}: {}",
            output.stdout
        )))
    }
}

#[then("the error output mentions \"{snippet}\"")]
fn stderr_mentions(cli_context: &CliContext, snippet: String) -> Result<(), StepError> {
    let output = captured_output(cli_context)?;
    if output.stderr.contains(snippet.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "stderr missing {snippet:?}: {}",
            output.stderr
        )))
    }
}

fn read_record(cli_context: &CliContext) -> Result<String, StepError> {
    let path = cli_context
        .record_path
        .as_deref()
        .ok_or_else(|| StepError::Assertion(String::from("no record path was requested")))?;
    std::fs::read_to_string(path)
        .map_err(|err| StepError::Assertion(format!("record was not written: {err}")))
}

#[then("the run record reports outcome \"{outcome}\"")]
fn record_reports_outcome(cli_context: &CliContext, outcome: String) -> Result<(), StepError> {
    let raw = read_record(cli_context)?;
    let record: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| StepError::Assertion(format!("record is not JSON ({err}): {raw}")))?;
    let actual = record
        .get("outcome")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| StepError::Assertion(format!("record has no outcome: {record}")))?;
    if actual == outcome.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected outcome {outcome}, got {actual}"
        )))
    }
}

#[then("the run record holds no key material")]
fn record_holds_no_key_material(cli_context: &CliContext) -> Result<(), StepError> {
    let raw = read_record(cli_context)?;
    if raw.contains("private_key") || raw.contains("certificate_pem") {
        Err(StepError::Assertion(format!(
            "record leaks key material: {raw}"
        )))
    } else {
        Ok(())
    }
}
