use std::path::Path;

use crate::config::DeploymentConfig;
use crate::error::DeployError;
use crate::exec::{Executor, quote};

/// Drive the hypervisor CLI through the ordered VM creation sequence.
///
/// The only idempotency is the existence guard up front: a VMID already
/// present in the listing is a terminal error before any mutating call.
/// A failure partway through leaves the VM partially configured; there
/// is no rollback, the error names the failed step instead.
pub async fn provision<E: Executor>(
    config: &DeploymentConfig,
    image_path: &Path,
    exec: &E,
) -> Result<(), DeployError> {
    config.validate_identity()?;
    let vmid = config.vmid;

    let listing = exec.run_checked("qm list").await?;
    if vm_listed(&listing, vmid) {
        return Err(DeployError::VmExists { vmid });
    }

    println!("Creating VM {vmid} ({})...", config.name);
    exec.run_checked(&format!(
        "qm create {vmid} --name {} --memory {} --cores {} \
         --net0 virtio,bridge={} --scsihw virtio-scsi-pci --ostype l26 \
         --description {}",
        quote(&config.name),
        config.memory_mb,
        config.cores,
        quote(&config.bridge),
        quote("ALT workstation (deployed by altdeploy)"),
    ))
    .await?;

    println!("Importing disk image...");
    let imported = exec
        .run_checked(&format!(
            "qm importdisk {vmid} {} {}",
            quote(&image_path.display().to_string()),
            quote(&config.storage),
        ))
        .await?;
    let volume = parse_imported_volume(&imported)
        .unwrap_or_else(|| format!("{}:vm-{vmid}-disk-0", config.storage));
    tracing::debug!(volume, "disk imported");

    println!("Attaching disk...");
    exec.run_checked(&format!("qm set {vmid} --scsi0 {}", quote(&volume)))
        .await?;

    if let Some(ref size) = config.disk_size {
        // Grow-only: qm refuses to shrink, which is exactly what we want.
        println!("Resizing disk to {size}...");
        exec.run_checked(&format!("qm resize {vmid} scsi0 {}", quote(size)))
            .await?;
    }

    println!("Configuring display and consoles...");
    exec.run_checked(&format!(
        "qm set {vmid} --vga std --serial0 socket --serial1 socket"
    ))
    .await?;

    println!("Enabling guest agent...");
    exec.run_checked(&format!("qm set {vmid} --agent enabled=1"))
        .await?;

    println!("Setting boot order...");
    exec.run_checked(&format!("qm set {vmid} --boot order=scsi0"))
        .await?;

    Ok(())
}

/// Whether a VMID appears in `qm list` output.
fn vm_listed(listing: &str, vmid: u32) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|first| first.parse::<u32>().ok())
        .any(|id| id == vmid)
}

/// Pull the storage volume id out of `qm importdisk` output.
///
/// The CLI reports `Successfully imported disk as 'unused0:local-lvm:vm-100-disk-0'`;
/// the leading unused-slot prefix is not part of the volume id.
fn parse_imported_volume(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if !line.to_ascii_lowercase().contains("imported disk as") {
            continue;
        }
        let start = line.find('\'')?;
        let rest = &line[start + 1..];
        let end = rest.find('\'')?;
        let mut volume = &rest[..end];
        if volume.starts_with("unused") {
            if let Some((_, vol)) = volume.split_once(':') {
                volume = vol;
            }
        }
        return Some(volume.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::exec::testing::{SpyExecutor, ok};
    use std::path::PathBuf;

    const LISTING: &str = "\
      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID
       100 alt-workstation      running    4096              32.00 1234
       205 builder              stopped    2048              16.00 0
";

    fn image_path() -> PathBuf {
        PathBuf::from("/var/cache/altdeploy/images/abcd1234-alt.qcow2")
    }

    #[test]
    fn listing_parse_matches_only_exact_ids() {
        assert!(vm_listed(LISTING, 100));
        assert!(vm_listed(LISTING, 205));
        assert!(!vm_listed(LISTING, 10));
        assert!(!vm_listed(LISTING, 20));
        assert!(!vm_listed("", 100));
    }

    #[test]
    fn imported_volume_parse() {
        let out = "importing disk...\nSuccessfully imported disk as 'unused0:local-lvm:vm-9999-disk-0'\n";
        assert_eq!(
            parse_imported_volume(out).as_deref(),
            Some("local-lvm:vm-9999-disk-0")
        );
        assert_eq!(parse_imported_volume("transferred 32 GiB\n"), None);
    }

    #[tokio::test]
    async fn existing_vmid_fails_before_any_mutating_call() {
        let mut config = test_config();
        config.vmid = 205;
        let spy = SpyExecutor::new().respond("qm list", ok(LISTING));

        let err = provision(&config, &image_path(), &spy).await.unwrap_err();
        assert!(matches!(err, DeployError::VmExists { vmid: 205 }));

        let recorded = spy.recorded();
        assert_eq!(recorded, vec!["qm list".to_string()]);
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let config = test_config();
        let spy = SpyExecutor::new()
            .respond("qm list", ok(LISTING))
            .respond(
                "qm importdisk",
                ok("Successfully imported disk as 'unused0:local-lvm:vm-9999-disk-0'"),
            );

        provision(&config, &image_path(), &spy).await.unwrap();

        let recorded = spy.recorded();
        let pos = |needle: &str| {
            recorded
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("no command matching '{needle}' in {recorded:?}"))
        };

        assert!(pos("qm list") < pos("qm create"));
        assert!(pos("qm create") < pos("qm importdisk"));
        assert!(pos("qm importdisk") < pos("--scsi0"));
        assert!(pos("--scsi0") < pos("qm resize"));
        assert!(pos("qm resize") < pos("--vga std"));
        assert!(pos("--vga std") < pos("--agent enabled=1"));
        assert!(pos("--agent enabled=1") < pos("--boot order=scsi0"));

        // attach uses the volume id reported by importdisk
        assert!(recorded[pos("--scsi0")].contains("local-lvm:vm-9999-disk-0"));
    }

    #[tokio::test]
    async fn resize_skipped_without_a_configured_size() {
        let mut config = test_config();
        config.disk_size = None;
        let spy = SpyExecutor::new().respond("qm list", ok(""));

        provision(&config, &image_path(), &spy).await.unwrap();

        assert!(!spy.recorded().iter().any(|c| c.contains("qm resize")));
        assert!(spy.recorded().iter().any(|c| c.contains("--boot order=scsi0")));
    }

    #[tokio::test]
    async fn empty_name_fails_before_listing() {
        let mut config = test_config();
        config.name = String::new();
        let spy = SpyExecutor::new();

        let err = provision(&config, &image_path(), &spy).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation { .. }));
        assert!(spy.recorded().is_empty());
    }
}
