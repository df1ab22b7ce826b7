use std::path::{Path, PathBuf};

use super::{CmdOutput, Executor};
use crate::error::DeployError;
use crate::paths;

/// Runs commands directly on this machine via `sh -c`.
pub struct LocalExecutor;

impl Executor for LocalExecutor {
    async fn run(&self, command: &str) -> Result<CmdOutput, DeployError> {
        tracing::debug!(command, "running local command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| DeployError::Io {
                context: format!("spawning `{command}`"),
                source: e,
            })?;
        Ok(CmdOutput::from_output(output))
    }

    async fn transfer(&self, local: &Path, remote: &Path) -> Result<(), DeployError> {
        if local == remote {
            return Ok(());
        }
        if let Some(parent) = remote.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeployError::Io {
                    context: format!("creating directory {}", parent.display()),
                    source: e,
                })?;
        }
        tokio::fs::copy(local, remote)
            .await
            .map_err(|e| DeployError::Io {
                context: format!("copying {} to {}", local.display(), remote.display()),
                source: e,
            })?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), DeployError> {
        let output = self.run("command -v qm").await?;
        if !output.success() {
            return Err(DeployError::Precondition {
                message: "this host does not look like a Proxmox VE node (`qm` not found)".into(),
                hint: "run on a Proxmox node, or deploy to one with --target [user@]host".into(),
            });
        }
        Ok(())
    }

    fn image_cache_dir(&self) -> PathBuf {
        paths::cache_dir()
    }

    fn describe(&self) -> String {
        "local host".to_string()
    }
}
