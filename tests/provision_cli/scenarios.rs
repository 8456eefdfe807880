//! BDD scenarios for the provision CLI.

use rstest_bdd_macros::scenario;

use super::test_helpers::{CliContext, cli_context};

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "Derive conventional resource names from the device name"
)]
fn scenario_derive_conventional_names(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "Configured resource names replace the derived ones"
)]
fn scenario_configured_names_win(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "The host flag overrides the configured device address"
)]
fn scenario_host_flag_overrides(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "An illegal device name is rejected before any work"
)]
fn scenario_illegal_device_name(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "A successful run exits zero"
)]
fn scenario_success_exits_zero(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "A failed verification exits one and names the step"
)]
fn scenario_verify_failure_exits_one(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(
    path = "tests/features/provision_cli.feature",
    name = "The run record excludes key material"
)]
fn scenario_record_excludes_key_material(cli_context: CliContext) {
    let _ = cli_context;
}
