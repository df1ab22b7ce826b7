use std::path::Path;

use console::style;

use crate::config::DeploymentConfig;
use crate::error::DeployError;
use crate::exec::Executor;
use crate::{cloudinit, image, provision, starter};

/// The full pipeline: acquire image, provision VM, cloud-init, start.
/// Each stage must succeed before the next runs; there is no rollback of
/// partially created VM state on failure.
pub async fn run<E: Executor>(
    config: &DeploymentConfig,
    config_path: &Path,
    executor: &E,
) -> Result<(), DeployError> {
    println!(
        "Deploying VM {} ({}) on {}",
        config.vmid,
        config.name,
        executor.describe()
    );

    let image_path = image::acquire(config, executor).await?;
    provision::provision(config, &image_path, executor).await?;

    let template = cloudinit::template_path(config_path);
    cloudinit::configure(config, &template, executor).await?;

    let ip = starter::start_and_wait(config.vmid, executor).await?;

    println!();
    println!(
        "{} VM {} ({}) deployed.",
        style("✔").green(),
        config.vmid,
        config.name
    );
    match ip {
        Some(ip) => println!("  guest IP: {ip}"),
        None => println!("  guest IP: not yet available (guest agent still starting?)"),
    }
    Ok(())
}
