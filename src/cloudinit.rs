use std::path::{Path, PathBuf};

use crate::config::DeploymentConfig;
use crate::error::DeployError;
use crate::exec::{Executor, quote};
use crate::paths;

/// First-boot credentials used when the config leaves them unset.
/// Insecure by design: meant for throwaway workstation VMs, not production.
pub const DEFAULT_CI_USER: &str = "altlinux";
pub const DEFAULT_CI_PASSWORD: &str = "altlinux";

/// The user-data template is looked up next to the config file.
pub fn template_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or(Path::new("."))
        .join("user-data.yaml")
}

/// Attach and populate the first-boot configuration drive.
///
/// A no-op when no user-data template exists locally — the VM then boots
/// with whatever the image ships. Otherwise: cloudinit drive on the
/// secondary IDE slot, first-boot credentials, and the template uploaded
/// to the target's snippets directory as custom user-data.
pub async fn configure<E: Executor>(
    config: &DeploymentConfig,
    template: &Path,
    exec: &E,
) -> Result<(), DeployError> {
    if !template.exists() {
        tracing::info!(path = %template.display(), "no user-data template, skipping cloud-init");
        return Ok(());
    }

    let vmid = config.vmid;
    println!("Configuring cloud-init...");

    exec.run_checked(&format!(
        "qm set {vmid} --ide2 {}:cloudinit",
        quote(&config.storage)
    ))
    .await?;

    let user = config.ci_user.as_deref().unwrap_or(DEFAULT_CI_USER);
    let password = config.ci_password.as_deref().unwrap_or(DEFAULT_CI_PASSWORD);
    if config.ci_password.is_none() {
        tracing::warn!("using the default cloud-init password; set CLOUD_INIT_PASSWORD for anything non-disposable");
    }
    exec.run_checked(&format!(
        "qm set {vmid} --ciuser {} --cipassword {}",
        quote(user),
        quote(password)
    ))
    .await?;

    let snippet_name = format!("vm-{vmid}-user-data.yaml");
    let snippet_path = Path::new(paths::SNIPPETS_DIR).join(&snippet_name);
    exec.run_checked(&format!("mkdir -p {}", quote(paths::SNIPPETS_DIR)))
        .await?;
    exec.transfer(template, &snippet_path).await?;

    exec.run_checked(&format!(
        "qm set {vmid} --cicustom {}",
        quote(&format!("user=local:snippets/{snippet_name}"))
    ))
    .await?;

    Ok(())
}
