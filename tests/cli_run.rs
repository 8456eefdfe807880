//! Behavioural tests for `tether provision` exit codes and messages.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::sync::LazyLock;

use escargot::CargoBuild;
use predicates::str::contains;

use test_constants::DEFAULT_DEVICE;

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

fn tether_cmd() -> assert_cmd::Command {
    TETHER_BIN.command().into()
}

#[test]
fn a_successful_run_exits_zero_and_names_the_device() {
    let mut cmd = tether_cmd();
    cmd.env("TETHER_FAKE_PROVISION_ENABLE", "1");
    cmd.env("TETHER_FAKE_PROVISION_MODE", "success");
    cmd.args(["provision", DEFAULT_DEVICE]);

    cmd.assert()
        .success()
        .stdout(contains("provisioned edge-01 successfully"));
}

#[test]
fn a_failed_verification_exits_one_with_step_and_attempts() {
    let mut cmd = tether_cmd();
    cmd.env("TETHER_FAKE_PROVISION_ENABLE", "1");
    cmd.env("TETHER_FAKE_PROVISION_MODE", "verify-failure");
    cmd.args(["provision", DEFAULT_DEVICE]);

    cmd.assert()
        .code(1)
        .stderr(contains("provisioning failed at verify"))
        .stderr(contains("3 attempt"));
}
