//! Shard participant binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use minireshard::{common::Config, ShardServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minireshard-shard")]
#[command(about = "minireshard shard participant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start shard participant server
    Serve {
        /// Shard ID
        #[arg(long)]
        id: String,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Status polls needed to finish cloning
        #[arg(long)]
        clone_batches: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            config,
            bind,
            clone_batches,
        } => {
            let config = Config::load(config.as_deref()).context("failed to load configuration")?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let mut shard_config = config.shard;
            if let Some(bind) = bind {
                shard_config.bind_addr = bind;
            }
            if let Some(batches) = clone_batches {
                shard_config.clone_batches = batches;
            }

            ShardServer::new(shard_config, id).serve().await?;
        }
    }

    Ok(())
}
