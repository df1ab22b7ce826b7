use std::path::Path;

use crate::config::{DEFAULT_CHECKSUM_URL, DEFAULT_IMAGE_URL};
use crate::error::DeployError;

/// Write a commented starter config. Refuses to clobber an existing one.
pub fn run(output_path: &Path) -> Result<(), DeployError> {
    if output_path.exists() {
        return Err(DeployError::Validation {
            message: format!("{} already exists", output_path.display()),
        });
    }

    let contents = format!(
        "\
# altdeploy node configuration
#
# Every key is optional; values shown are the built-in defaults.

VMID=100
VM_NAME=alt-workstation
MEMORY=4096
CORES=2
DISK_SIZE=32G
BRIDGE=vmbr0
STORAGE=local-lvm

IMAGE_URL={DEFAULT_IMAGE_URL}
CHECKSUM_URL={DEFAULT_CHECKSUM_URL}

# First-boot credentials for the cloud-init drive. Defaults are insecure;
# set these for anything that outlives a demo.
# CLOUD_INIT_USER=altlinux
# CLOUD_INIT_PASSWORD=change-me
"
    );

    std::fs::write(output_path, contents).map_err(|e| DeployError::Io {
        context: format!("writing {}", output_path.display()),
        source: e,
    })?;

    println!("Created {}", output_path.display());
    println!("Run `altdeploy` to deploy the VM.");
    Ok(())
}
