//! CLI for resharding operations

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use minireshard::common::NodeState;
use minireshard::ops::{
    cluster_status, forget_operation, list_operations, list_shards, register_collection,
    register_shard, show_collection, show_operation, submit_reshard,
};
use minireshard::reshard::catalog::ShardInfo;
use minireshard::reshard::types::{ChunkRange, Namespace, ZoneRange};
use minireshard::ReshardCollectionRequest;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "minireshard")]
#[command(about = "minireshard resharding CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:5000")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reshard a collection onto a new shard key
    Reshard {
        /// Namespace (db.collection)
        namespace: String,

        /// New shard key, as JSON (e.g. '{"customer": 1}')
        #[arg(long)]
        key: String,

        /// Zones for the new key, as a JSON array
        #[arg(long)]
        zones: Option<String>,

        /// Number of chunks the new collection starts with
        #[arg(long)]
        num_initial_chunks: Option<u32>,

        /// Exact chunk layout, as a JSON array (test deployments only)
        #[arg(long)]
        preset_chunks: Option<String>,

        /// Collation, as JSON
        #[arg(long)]
        collation: Option<String>,

        /// Return once the operation is registered
        #[arg(long)]
        no_wait: bool,
    },

    /// List operations
    List,

    /// Show one operation record
    Show { operation_id: Uuid },

    /// Delete a finished operation record
    Forget { operation_id: Uuid },

    /// Coordinator status
    Status,

    /// Shard a collection, or show its routing when no key is given
    Collection {
        namespace: String,

        /// Shard key, as JSON
        #[arg(long, requires = "shards")]
        key: Option<String>,

        /// Owning shards
        #[arg(long, value_delimiter = ',')]
        shards: Vec<String>,
    },

    /// Register a shard, or list shards when no address is given
    Shard {
        id: Option<String>,

        #[arg(long, requires = "id")]
        address: Option<String>,

        #[arg(long, value_delimiter = ',')]
        zones: Vec<String>,

        /// Register the shard as draining
        #[arg(long)]
        draining: bool,
    },
}

fn parse_json<T: DeserializeOwned>(what: &str, raw: &str) -> anyhow::Result<T> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON for {}", what))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reshard {
            namespace,
            key,
            zones,
            num_initial_chunks,
            preset_chunks,
            collation,
            no_wait,
        } => {
            let namespace = Namespace::parse(&namespace)?;
            let key: Map<String, Value> = parse_json("--key", &key)?;
            let mut request = ReshardCollectionRequest::new(namespace, key);
            request.zones = zones
                .map(|z| parse_json::<Vec<ZoneRange>>("--zones", &z))
                .transpose()?;
            request.preset_resharded_chunks = preset_chunks
                .map(|c| parse_json::<Vec<ChunkRange>>("--preset-chunks", &c))
                .transpose()?;
            request.collation = collation
                .map(|c| parse_json::<Value>("--collation", &c))
                .transpose()?;
            request.num_initial_chunks = num_initial_chunks;

            let report = submit_reshard(&cli.coordinator, &request, !no_wait).await?;
            match &report.result {
                Some(result) => {
                    println!("Resharding done:");
                    println!("  Operation: {}", result.operation_id);
                    println!("  New collection UUID: {}", result.new_collection_uuid);
                    println!("  Key: {}", result.key_pattern);
                    println!("  Donors: {}", result.donors.join(", "));
                    println!("  Recipients: {}", result.recipients.join(", "));
                    println!("  Documents copied: {}", result.documents_copied);
                }
                None => {
                    if let Some(id) = report.operation_id() {
                        println!("Resharding registered: {}", id);
                    }
                }
            }
            if report.attached {
                println!("  (joined an operation that was already running)");
            }
        }

        Commands::List => {
            let operations = list_operations(&cli.coordinator).await?;
            if operations.is_empty() {
                println!("No operations");
            }
            for op in operations {
                let created = op["created_at"]
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}  {}  {:<20} {:<18} {}",
                    op["operation_id"].as_str().unwrap_or("?"),
                    created,
                    op["namespace"].as_str().unwrap_or("?"),
                    op["phase"].as_str().unwrap_or("?"),
                    op["key"]
                );
            }
        }

        Commands::Show { operation_id } => {
            let record = show_operation(&cli.coordinator, operation_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Forget { operation_id } => {
            forget_operation(&cli.coordinator, operation_id).await?;
            println!("Forgot {}", operation_id);
        }

        Commands::Status => {
            let status = cluster_status(&cli.coordinator).await?;
            println!("Coordinator {}:", status.node_id);
            println!("  Role: {} (term {})", status.role, status.term);
            println!("  Serving: {}", status.serving);
            println!("  Active instances: {}", status.active_instances);
            println!(
                "  Records: {} live / {} total",
                status.live_records, status.total_records
            );
        }

        Commands::Collection {
            namespace,
            key,
            shards,
        } => {
            let namespace = Namespace::parse(&namespace)?;
            let entry = match key {
                Some(key) => {
                    let key = parse_json("--key", &key)?;
                    register_collection(&cli.coordinator, &namespace, key, shards, Vec::new())
                        .await?
                }
                None => show_collection(&cli.coordinator, &namespace).await?,
            };
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }

        Commands::Shard {
            id,
            address,
            zones,
            draining,
        } => match (id, address) {
            (Some(id), Some(address)) => {
                let mut shard = ShardInfo::new(id, address);
                shard.zones = zones;
                if draining {
                    shard.state = NodeState::Draining;
                }
                let shard = register_shard(&cli.coordinator, &shard).await?;
                println!("Registered {} at {} ({})", shard.id, shard.address, shard.state);
            }
            _ => {
                for shard in list_shards(&cli.coordinator).await? {
                    println!(
                        "{:<12} {:<28} {:<9} {}",
                        shard.id,
                        shard.address,
                        shard.state,
                        shard.zones.join(",")
                    );
                }
            }
        },
    }

    Ok(())
}
