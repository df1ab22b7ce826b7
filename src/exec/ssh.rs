use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::{CmdOutput, Executor};
use crate::error::DeployError;
use crate::paths;

const CONNECT_TIMEOUT_SECS: u32 = 5;

/// Runs commands on a remote Proxmox node over OpenSSH.
///
/// Authentication is non-interactive by contract (`BatchMode=yes`):
/// either the given key or whatever the user's agent/config provides.
pub struct SshExecutor {
    host: String,
    user: String,
    key: Option<PathBuf>,
}

impl SshExecutor {
    pub fn new(host: String, user: String, key: Option<PathBuf>) -> Self {
        Self { host, user, key }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// scp target spec. The remote path is expanded by the remote shell,
    /// so it is quoted like any other interpolated command value.
    fn scp_target(&self, remote: &Path) -> String {
        format!(
            "{}:{}",
            self.destination(),
            super::quote(&remote.display().to_string())
        )
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(ref key) = self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    async fn capture(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<CmdOutput, DeployError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::Io {
                context: format!("spawning {program}"),
                source: e,
            })?;
        Ok(CmdOutput::from_output(output))
    }
}

impl Executor for SshExecutor {
    async fn run(&self, command: &str) -> Result<CmdOutput, DeployError> {
        tracing::debug!(host = %self.host, command, "running remote command");
        let mut args = self.base_args();
        args.push(self.destination());
        args.push(command.to_string());
        self.capture("ssh", &args).await
    }

    async fn transfer(&self, local: &Path, remote: &Path) -> Result<(), DeployError> {
        tracing::debug!(
            host = %self.host,
            local = %local.display(),
            remote = %remote.display(),
            "copying file to remote target"
        );
        let mut args = self.base_args();
        args.push(local.display().to_string());
        args.push(self.scp_target(remote));
        let output = self.capture("scp", &args).await?;
        if !output.success() {
            return Err(DeployError::Command {
                command: format!("scp {} {}", local.display(), self.scp_target(remote)),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), DeployError> {
        // Bounded-timeout handshake before any stage proceeds.
        let mut args = self.base_args();
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"));
        args.push(self.destination());
        args.push("true".to_string());
        let output = self.capture("ssh", &args).await?;
        if !output.success() {
            return Err(DeployError::Precondition {
                message: format!(
                    "remote target {} is unreachable over SSH: {}",
                    self.destination(),
                    output.stderr.trim()
                ),
                hint: "check host, user, and key; the connection must work without a password prompt".into(),
            });
        }

        let qm = self.run("command -v qm").await?;
        if !qm.success() {
            return Err(DeployError::Precondition {
                message: format!("`qm` not found on {}", self.destination()),
                hint: "the remote target must be a Proxmox VE node".into(),
            });
        }
        Ok(())
    }

    fn image_cache_dir(&self) -> PathBuf {
        PathBuf::from(paths::REMOTE_CACHE_DIR)
    }

    fn describe(&self) -> String {
        format!("{} (ssh)", self.destination())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scp_remote_path_is_quoted() {
        let exec = SshExecutor::new("pve1.lab".into(), "root".into(), None);
        assert_eq!(
            exec.scp_target(Path::new("/var/cache/altdeploy/images/ab12-alt image.qcow2")),
            "root@pve1.lab:'/var/cache/altdeploy/images/ab12-alt image.qcow2'"
        );
        assert_eq!(
            exec.scp_target(Path::new("/tmp/plain.qcow2")),
            "root@pve1.lab:/tmp/plain.qcow2"
        );
    }
}
