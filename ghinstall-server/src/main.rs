// ghinstall-server/src/main.rs
mod server;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ghinstall_core::ServerConfig;
use rmcp::{service::ServiceExt, transport::io};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::server::InstallServer;

#[derive(Parser, Debug)]
#[command(author, version, about = "MCP server that helps an agent install GitHub repositories")]
struct Args {
    /// Optional TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set. Logs always go to stderr.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Kill commands that run longer than this many seconds. Overrides the config file.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,
}

fn init_logging(default_level: Level) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    // stdout carries the MCP transport, so everything goes to stderr.
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let config = ServerConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => ServerConfig::default(),
    };
    if let Some(secs) = args.timeout_secs {
        config.runner.timeout_secs = Some(secs);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level)?;
    let config = load_config(&args).context("Failed to load server configuration")?;

    let ct = CancellationToken::new();
    let server = InstallServer::new(config, ct.clone());
    let transport = io::stdio();

    info!("Starting ghinstall MCP server...");

    let service = server
        .serve_with_ct(transport, ct.clone())
        .await
        .map_err(|e| anyhow!("Failed to start MCP service: {}", e))?;

    tokio::select! {
        quit = service.waiting() => {
            if let Err(e) = quit {
                error!(error = %e, "Server loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    // Kills any command still running on behalf of a client.
    ct.cancel();
    info!("ghinstall MCP server stopped.");
    Ok(())
}
