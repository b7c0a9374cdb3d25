use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use courier_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use courier_shell::logging::init_tracing;
use courier_shell::{JsonLinesSurface, Shell, ShellExit, read_commands};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Commands from the presentation layer waiting to be handled.
const COMMAND_BACKLOG: usize = 32;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "courier-shell")]
#[command(
    about = "Desktop shell that supervises the Courier backend and keeps the app up to date"
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before the environment is read
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Treat this run as a packaged build
    #[arg(long, conflicts_with = "development")]
    packaged: bool,

    /// Treat this run as a development checkout
    #[arg(long)]
    development: bool,

    /// Never check for or install updates
    #[arg(long)]
    no_updates: bool,

    /// Log the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn packaged_override(&self) -> Option<bool> {
        match (self.packaged, self.development) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // The stdin reader can sit in a blocking read; don't wait on it forever.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(exit) => {
            info!(?exit, "courier shell exited");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ShellExit> {
    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        packaged: cli.packaged_override(),
    })
    .load()
    .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    match config.metadata.config_path.as_ref() {
        Some(path) => info!(path = %path.display(), "configuration file loaded"),
        None => info!("no configuration file; using defaults and environment"),
    }
    for warning in warnings.iter() {
        match warning.hint.as_deref() {
            Some(hint) => warn!(hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    if cli.no_updates {
        config.updates.enabled = false;
    }

    if cli.print_config {
        info!(config = ?config, "resolved configuration");
        return Ok(ShellExit::Closed);
    }

    let surface = Arc::new(JsonLinesSurface::spawn(tokio::io::stdout()));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BACKLOG);
    tokio::spawn(read_commands(tokio::io::stdin(), command_tx));

    let shell = Shell::builder(&config)
        .build(surface, command_rx)
        .context("failed to assemble the shell")?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let exit = shell.run(shutdown).await.context("shell failed")?;
    Ok(exit)
}
