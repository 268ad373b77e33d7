//! Data node binary

use clap::{Parser, Subcommand, ValueEnum};
use shardkv::common::{parse_duration, Config, ConsistencyPolicy, ReadPolicy};
use shardkv::DataNodeServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-datanode")]
#[command(about = "shardkv data node: one replica of one shard group")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Consistency {
    BestEffort,
    QuorumRequired,
}

#[derive(Clone, Copy, ValueEnum)]
enum Reads {
    Relaxed,
    Serialized,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a data node
    Serve {
        /// Shard group number (registers as data<N>)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        shard: Option<u32>,

        /// Bind address for gRPC
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Address registered for peers and clients (default: 127.0.0.1:<bind port>)
        #[arg(long)]
        advertise: Option<String>,

        /// Master address
        #[arg(long)]
        coordinator: Option<String>,

        /// Bind address for the status HTTP API
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Membership root path
        #[arg(long)]
        root: Option<String>,

        /// Bound on each outbound sync (e.g. "2s")
        #[arg(long)]
        sync_timeout: Option<String>,

        /// Answer to writes that miss their quorum
        #[arg(long, value_enum)]
        consistency: Option<Consistency>,

        /// Whether reads wait for in-flight writes
        #[arg(long, value_enum)]
        reads: Option<Reads>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            shard,
            bind,
            advertise,
            coordinator,
            http,
            root,
            sync_timeout,
            consistency,
            reads,
        } => {
            // File and environment first, flags on top
            let mut node = config.datanode.unwrap_or_default();
            if let Some(shard) = shard {
                node.shard_id = shard;
            }
            if let Some(bind) = bind {
                node.bind_addr = bind;
                if advertise.is_none() {
                    node.advertise_addr = format!("127.0.0.1:{}", bind.port());
                }
            }
            if let Some(advertise) = advertise {
                node.advertise_addr = advertise;
            }
            if let Some(coordinator) = coordinator {
                node.coordinator = coordinator;
            }
            if http.is_some() {
                node.http_addr = http;
            }
            if let Some(root) = root {
                node.membership_root = root;
            }
            if let Some(timeout) = sync_timeout {
                node.sync_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if let Some(consistency) = consistency {
                node.replication.consistency = match consistency {
                    Consistency::BestEffort => ConsistencyPolicy::BestEffort,
                    Consistency::QuorumRequired => ConsistencyPolicy::QuorumRequired,
                };
            }
            if let Some(reads) = reads {
                node.replication.reads = match reads {
                    Reads::Relaxed => ReadPolicy::Relaxed,
                    Reads::Serialized => ReadPolicy::Serialized,
                };
            }

            DataNodeServer::new(node).serve().await?;
        }
    }

    Ok(())
}
