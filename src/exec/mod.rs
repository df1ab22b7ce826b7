pub mod local;
pub mod ssh;

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::DeployError;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

/// Captured result of a command run on the execution target.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        }
    }
}

/// One contract for running commands and copying files on the execution
/// target, regardless of transport. Every pipeline stage is written
/// against this trait only and never branches on the concrete transport.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Executor {
    /// Run a shell command, capturing stdout/stderr. A non-zero exit is
    /// not an error at this level; use `run_checked` when it should be.
    async fn run(&self, command: &str) -> Result<CmdOutput, DeployError>;

    /// Copy a local file to a path on the execution target.
    async fn transfer(&self, local: &Path, remote: &Path) -> Result<(), DeployError>;

    /// Verify the target is usable before any stage runs (connectivity,
    /// presence of the hypervisor CLI). Fatal on failure.
    async fn probe(&self) -> Result<(), DeployError>;

    /// Image cache directory on the execution target's filesystem.
    fn image_cache_dir(&self) -> PathBuf;

    /// Human-readable target description for log lines.
    fn describe(&self) -> String;

    /// Run a command that must succeed; surfaces the command's stderr
    /// verbatim on a non-zero exit. No retries.
    async fn run_checked(&self, command: &str) -> Result<String, DeployError> {
        let output = self.run(command).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(DeployError::Command {
                command: command.to_string(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Where hypervisor commands actually run. Chosen once at startup,
/// immutable for the run.
#[derive(Debug, Clone)]
pub enum ExecTarget {
    Local,
    Remote {
        host: String,
        user: String,
        key: Option<PathBuf>,
    },
}

impl ExecTarget {
    /// Build a target from the CLI flags: `--target [user@]host` selects
    /// remote execution, otherwise commands run locally.
    pub fn from_flags(target: Option<&str>, key: Option<&Path>) -> Self {
        match target {
            Some(spec) => {
                let (user, host) = match spec.split_once('@') {
                    Some((user, host)) => (user.to_string(), host.to_string()),
                    None => ("root".to_string(), spec.to_string()),
                };
                ExecTarget::Remote {
                    host,
                    user,
                    key: key.map(Path::to_path_buf),
                }
            }
            None => ExecTarget::Local,
        }
    }
}

/// Concrete executor for the chosen target.
pub enum Runner {
    Local(LocalExecutor),
    Ssh(SshExecutor),
}

pub fn create_executor(target: ExecTarget) -> Runner {
    match target {
        ExecTarget::Local => Runner::Local(LocalExecutor),
        ExecTarget::Remote { host, user, key } => Runner::Ssh(SshExecutor::new(host, user, key)),
    }
}

impl Executor for Runner {
    async fn run(&self, command: &str) -> Result<CmdOutput, DeployError> {
        match self {
            Runner::Local(e) => e.run(command).await,
            Runner::Ssh(e) => e.run(command).await,
        }
    }

    async fn transfer(&self, local: &Path, remote: &Path) -> Result<(), DeployError> {
        match self {
            Runner::Local(e) => e.transfer(local, remote).await,
            Runner::Ssh(e) => e.transfer(local, remote).await,
        }
    }

    async fn probe(&self) -> Result<(), DeployError> {
        match self {
            Runner::Local(e) => e.probe().await,
            Runner::Ssh(e) => e.probe().await,
        }
    }

    fn image_cache_dir(&self) -> PathBuf {
        match self {
            Runner::Local(e) => e.image_cache_dir(),
            Runner::Ssh(e) => e.image_cache_dir(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Runner::Local(e) => e.describe(),
            Runner::Ssh(e) => e.describe(),
        }
    }
}

/// Quote a value for interpolation into a backend command string.
pub fn quote(value: &str) -> String {
    shell_escape::escape(Cow::Borrowed(value)).into_owned()
}


#[cfg(test)]
pub mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::{CmdOutput, Executor};
    use crate::error::DeployError;

    /// Records every command and serves canned responses, for the
    /// ordering/guard property tests.
    pub struct SpyExecutor {
        pub commands: Mutex<Vec<String>>,
        /// First rule whose substring matches the command wins; commands
        /// with no matching rule succeed with empty output.
        pub responses: Vec<(&'static str, CmdOutput)>,
    }

    impl SpyExecutor {
        pub fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                responses: Vec::new(),
            }
        }

        pub fn respond(mut self, needle: &'static str, output: CmdOutput) -> Self {
            self.responses.push((needle, output));
            self
        }

        pub fn recorded(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    pub fn ok(stdout: &str) -> CmdOutput {
        CmdOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            code: 0,
        }
    }

    pub fn fail(stderr: &str) -> CmdOutput {
        CmdOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            code: 1,
        }
    }

    impl Executor for SpyExecutor {
        async fn run(&self, command: &str) -> Result<CmdOutput, DeployError> {
            self.commands.lock().unwrap().push(command.to_string());
            for (needle, output) in &self.responses {
                if command.contains(needle) {
                    return Ok(output.clone());
                }
            }
            Ok(ok(""))
        }

        async fn transfer(&self, local: &Path, remote: &Path) -> Result<(), DeployError> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("transfer {} {}", local.display(), remote.display()));
            Ok(())
        }

        async fn probe(&self) -> Result<(), DeployError> {
            Ok(())
        }

        fn image_cache_dir(&self) -> PathBuf {
            PathBuf::from("/var/cache/altdeploy/images")
        }

        fn describe(&self) -> String {
            "spy".to_string()
        }
    }
}
