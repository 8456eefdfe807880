//! Command-line interface definitions for the `tether` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `tether` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    about = "Provision an IoT device with a cloud identity and a running edge agent",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a device's cloud identity and install the edge agent.
    #[command(
        name = "provision",
        about = "Provision a device's cloud identity and install the edge agent"
    )]
    Provision(ProvisionCommand),
}

/// Arguments for the `tether provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Name of the device to provision.
    ///
    /// The name becomes the IoT thing name and seeds the conventional names of
    /// the role, role alias, and policies unless configuration overrides them.
    #[arg(value_name = "DEVICE")]
    pub(crate) device: String,
    /// Override the configured SSH host for this run.
    ///
    /// The remote session connects to this address instead of the host named
    /// in configuration; every other SSH setting is unchanged.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Rotate the device certificate even when the cloud already holds one.
    ///
    /// Existing certificates stay attached to the thing; the run registers a
    /// fresh certificate and installs its key material on the device.
    #[arg(long)]
    pub(crate) force_recreate: bool,
    /// Write a JSON record of the run to this path.
    ///
    /// The record captures the outcome, per-step states and attempt counts,
    /// and the cloud resource identifiers. Certificate PEM and private key
    /// material never appear in it.
    #[arg(long, value_name = "PATH")]
    pub(crate) record: Option<String>,
}
