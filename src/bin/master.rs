//! Master binary

use clap::{Parser, Subcommand};
use shardkv::common::{parse_duration, Config};
use shardkv::MasterServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-master")]
#[command(about = "shardkv master: shard routing and cluster coordination")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master
    Serve {
        /// Bind address for gRPC (KvNode + coordination)
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Bind address for the status HTTP API
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Disable the status HTTP API
        #[arg(long)]
        no_http: bool,

        /// Membership root path
        #[arg(long)]
        root: Option<String>,

        /// Fixed shard count (default: size of the routing table)
        #[arg(long)]
        shard_count: Option<u32>,

        /// Coordination session timeout (e.g. "10s")
        #[arg(long)]
        session_timeout: Option<String>,

        /// Timeout for calls to data nodes (e.g. "2s")
        #[arg(long)]
        rpc_timeout: Option<String>,

        /// Timeout for clone and warm-up calls that push whole logs (e.g. "5m")
        #[arg(long)]
        bulk_timeout: Option<String>,
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
            grpc,
            http,
            no_http,
            root,
            shard_count,
            session_timeout,
            rpc_timeout,
            bulk_timeout,
        } => {
            // File and environment first, flags on top
            let mut master = config.master.unwrap_or_default();
            if let Some(grpc) = grpc {
                master.grpc_addr = grpc;
            }
            if let Some(http) = http {
                master.http_addr = Some(http);
            }
            if no_http {
                master.http_addr = None;
            }
            if let Some(root) = root {
                master.membership_root = root;
            }
            if shard_count.is_some() {
                master.shard_count = shard_count;
            }
            if let Some(timeout) = session_timeout {
                master.session_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if let Some(timeout) = rpc_timeout {
                master.rpc_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if let Some(timeout) = bulk_timeout {
                master.bulk_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }

            MasterServer::new(master).serve().await?;
        }
    }

    Ok(())
}
