use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "altdeploy", about = "Deploy an ALT workstation VM on a Proxmox VE host", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "altdeploy.conf")]
    pub config: PathBuf,

    /// VM id (overrides config)
    #[arg(long)]
    pub vmid: Option<u32>,

    /// VM name (overrides config)
    #[arg(long)]
    pub name: Option<String>,

    /// Deploy to a remote Proxmox host over SSH ([user@]host, user defaults to root)
    #[arg(long, value_name = "HOST")]
    pub target: Option<String>,

    /// SSH private key for the remote target
    #[arg(long, value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the image, create the VM, configure first boot, and start it (default)
    Deploy,

    /// Download and verify the disk image only, then print its path
    Fetch,

    /// Run the host prerequisite setup script on the execution target
    Setup {
        /// Setup script to delegate to
        #[arg(long, default_value = "./setup-node.sh")]
        script: PathBuf,
    },

    /// Write a commented default altdeploy.conf
    Init,
}
