//! Decommission tool for a device's cloud identity resources.
//!
//! This binary removes the certificates, policies, role alias, role and
//! thing that provisioning created for a device, in dependency order, and
//! then verifies nothing is left attached.

use clap::Parser;
use std::io::Write as _;
use tether::aws::AwsBackend;
use tether::backend::DeviceRequest;
use tether::config::CloudConfig;
use tether::janitor::{Janitor, JanitorConfig};

#[derive(Debug, Parser)]
#[command(
    name = "tether-janitor",
    about = "Remove the cloud identity resources provisioned for a device"
)]
struct Cli {
    /// Device whose resources are removed.
    #[arg(long)]
    device: String,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let config = CloudConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    let request = DeviceRequest::builder()
        .device_name(cli.device.as_str())
        .role_name(config.role_name.clone())
        .role_alias(config.role_alias.clone())
        .device_policy(config.device_policy.clone())
        .exchange_policy(config.exchange_policy.clone())
        .build()
        .map_err(|err| err.to_string())?;
    let backend = AwsBackend::new(&config)
        .await
        .map_err(|err| err.to_string())?;
    let janitor = Janitor::new(JanitorConfig::from_request(&request), backend);
    let summary = janitor.sweep().await.map_err(|err| err.to_string())?;
    writeln!(
        std::io::stdout(),
        "decommission sweep complete: detached_certificates={}, deleted_certificates={}, deleted_policies={}",
        summary.detached_certificates,
        summary.deleted_certificates,
        summary.deleted_policies
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}
