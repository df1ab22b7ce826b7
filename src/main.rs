use std::path::Path;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use altdeploy::cli::{Cli, Command};
use altdeploy::config::{self, Overrides};
use altdeploy::error::DeployError;
use altdeploy::exec::{self, ExecTarget, Executor};
use altdeploy::{deploy, image, init};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("altdeploy=debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("altdeploy=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Handle init before loading config — it creates the config
    if matches!(cli.command, Some(Command::Init)) {
        return init::run(&cli.config).map_err(Into::into);
    }

    let overrides = Overrides {
        vmid: cli.vmid,
        name: cli.name.clone(),
    };
    let config = config::load(&cli.config, &overrides)?;

    // Argument problems are reported before the target probe runs.
    if let Some(Command::Setup { ref script }) = cli.command
        && !script.exists()
    {
        return Err(DeployError::Validation {
            message: format!("setup script not found: {}", script.display()),
        }
        .into());
    }

    // The execution target is chosen once and threaded through every
    // stage; nothing downstream branches on the transport.
    let target = ExecTarget::from_flags(cli.target.as_deref(), cli.ssh_key.as_deref());
    let executor = exec::create_executor(target);
    executor.probe().await?;
    tracing::info!(target = %executor.describe(), "execution target ready");

    match cli.command.unwrap_or(Command::Deploy) {
        Command::Init => unreachable!(),
        Command::Deploy => deploy::run(&config, &cli.config, &executor).await?,
        Command::Fetch => {
            let path = image::acquire(&config, &executor).await?;
            println!("{}", path.display());
        }
        Command::Setup { script } => run_setup(&script, &executor).await?,
    }

    Ok(())
}

/// Host prerequisite setup is owned by an external script; we only carry
/// it to the target and surface its outcome. The script's existence was
/// already validated before the target probe ran.
async fn run_setup<E: Executor>(script: &Path, executor: &E) -> Result<(), DeployError> {
    let staged = Path::new("/tmp/altdeploy-setup.sh");
    executor.transfer(script, staged).await?;
    let output = executor
        .run_checked(&format!("bash {}", staged.display()))
        .await?;
    print!("{output}");
    println!("{} host setup finished.", style("✔").green());
    Ok(())
}
