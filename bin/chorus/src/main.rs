use std::{net::SocketAddr, path::PathBuf};

use chorus_config::{Config, Environment};
use chorus_node::NodeBuilder;
use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Node configuration file.
    #[arg(long, short, default_value = "chorus.toml")]
    config: PathBuf,

    #[arg(long)]
    environment: Option<Environment>,

    #[arg(long)]
    database_url: Option<String>,

    #[arg(long)]
    rpc_listen: Option<SocketAddr>,

    #[arg(long)]
    registry_url: Option<String>,

    /// Produce blocks with the built-in single validator loop.
    #[arg(long)]
    solo: bool,

    /// Keep every block.
    #[arg(long)]
    archive: bool,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(rpc_listen) = self.rpc_listen {
            config.rpc_listen = rpc_listen;
        }
        if self.registry_url.is_some() {
            config.registry_url = self.registry_url;
        }
        config.solo |= self.solo;
        config.archive |= self.archive;
        config
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chorus_node=debug,chorus=debug"));
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .wrap_err_with(|| format!("load config from {}", args.config.display()))?;
    let config = args.apply(config);
    config.validate().wrap_err("invalid configuration")?;
    tracing::info!(
        environment = %config.environment,
        chain_id = %config.chain_id,
        database_url = %config.database_url,
        rpc_listen = %config.rpc_listen,
        solo = config.solo,
        "starting chorus node"
    );

    let handle = NodeBuilder::new(config).launch().await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        _ = handle.stopped() => tracing::info!("RPC server stopped"),
    }

    handle.shutdown().await
}
