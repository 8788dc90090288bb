//! Edge agent launcher.
//!
//! - `edge run` (default): restore pipelines, talk to the control plane,
//!   stop everything on Ctrl-C
//! - `edge config`: print the resolved configuration as JSON

mod config;
mod daemon;
mod identity;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::EdgeConfig;
use edge_protocol::paths::default_base_dir;
use edge_protocol::EdgePaths;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "edge", version, about = "Edge data-collection agent")]
struct Cli {
    /// Agent base directory (data/, etc/, log/)
    #[arg(long, global = true, env = "EDGE_HOME")]
    base_dir: Option<PathBuf>,

    /// Configuration file [default: <base>/etc/edge.conf]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Control-plane base URL; enables the control plane
    #[arg(long, global = true)]
    control_plane_url: Option<String>,

    /// Application auth token for the control plane
    #[arg(long, global = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until Ctrl-C
    Run,
    /// Print the resolved configuration as JSON
    Config,
}

impl Cli {
    fn paths(&self) -> EdgePaths {
        EdgePaths::new(self.base_dir.clone().unwrap_or_else(default_base_dir))
    }

    /// File configuration with the command-line overrides applied.
    fn resolve_config(&self, paths: &EdgePaths) -> Result<EdgeConfig> {
        let path = self.config.clone().unwrap_or_else(|| paths.config_file());
        let mut config = EdgeConfig::load(&path)?;
        if let Some(url) = &self.control_plane_url {
            config.control_plane.base_url = url.clone();
            config.control_plane.enabled = true;
        }
        if let Some(token) = &self.auth_token {
            config.control_plane.app_auth_token = token.clone();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let paths = cli.paths();
    let config = cli.resolve_config(&paths)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run => {
            paths.create_dirs().with_context(|| {
                format!("Failed to create directories under {}", paths.base().display())
            })?;
            edge_logging::init_logging(config.log.to_log_config(&paths.log_dir(), cli.verbose))?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build Tokio runtime")?;
            let result = runtime.block_on(daemon::run(paths, config));
            if let Err(err) = &result {
                tracing::error!(error = %format!("{:#}", err), "Edge agent failed");
            }
            result
        }
    }
}
