use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DeployError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("image download failed: {message}")]
    Download {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    #[diagnostic(help("the downloaded file is kept for inspection; delete it to force a re-download"))]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("command failed: {command}\n{stderr}")]
    Command { command: String, stderr: String },

    #[error("{message}")]
    #[diagnostic(help("{hint}"))]
    Precondition { message: String, hint: String },

    #[error("VM {vmid} already exists on the target host")]
    #[diagnostic(help("pick another id with --vmid, or remove the VM with `qm destroy <vmid>` first"))]
    VmExists { vmid: u32 },
}
