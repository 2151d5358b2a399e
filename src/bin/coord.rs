//! Coordinator binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use minireshard::{
    common::{Config, ShardEndpoint},
    Coordinator,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minireshard-coord")]
#[command(about = "minireshard resharding coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Shard to register at startup, as id=address (repeatable)
        #[arg(long = "shard", value_parser = parse_shard)]
        shards: Vec<ShardEndpoint>,

        /// Start as follower instead of taking the metadata authority
        #[arg(long)]
        follower: bool,

        /// Accept test-only request options
        #[arg(long)]
        enable_test_commands: bool,
    },
}

fn parse_shard(value: &str) -> Result<ShardEndpoint, String> {
    let (id, address) = value
        .split_once('=')
        .ok_or_else(|| format!("expected id=address, got {:?}", value))?;
    Ok(ShardEndpoint {
        id: id.to_string(),
        address: address.to_string(),
        zones: Vec::new(),
    })
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            config,
            bind,
            db,
            shards,
            follower,
            enable_test_commands,
        } => {
            // File and environment first, CLI arguments win
            let mut config =
                Config::load(config.as_deref()).context("failed to load configuration")?;
            init_tracing(&config.log_level);

            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            if let Some(db) = db {
                config.coordinator.db_path = db;
            }
            if follower {
                config.coordinator.authority = false;
            }
            if enable_test_commands {
                config.coordinator.test_commands_enabled = true;
            }
            config.coordinator.shards.extend(shards);

            let coord = Coordinator::new(config.coordinator, config.node_id);
            coord.serve().await?;
        }
    }

    Ok(())
}
