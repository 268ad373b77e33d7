//! CLI client for a shardkv cluster

use clap::{Parser, Subcommand};
use shardkv::client::{KvClient, Outcome};
use shardkv::common::parse_duration;
use shardkv::ops::verify_cluster;
use shardkv::transport::GrpcTransport;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "shardkv client")]
#[command(version)]
struct Cli {
    /// Master (or data node) address
    #[arg(long, default_value = "localhost:50051")]
    target: String,

    /// Per-request timeout
    #[arg(long, default_value = "5s")]
    timeout: String,

    /// One-shot command; interactive shell when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Put a value
    Put { key: String, value: String },

    /// Read a value
    Read { key: String },

    /// Delete a key
    Delete { key: String },

    /// Run a random write/update/delete workload and check every read
    Verify {
        /// Number of request pairs
        #[arg(short = 'n', long, default_value = "100")]
        requests: usize,

        /// Workload seed (random if omitted)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let timeout = parse_duration(&cli.timeout)?;
    let transport = Arc::new(GrpcTransport::new(timeout, timeout));
    let client = KvClient::new(transport, cli.target.clone());

    let greeting = client.hello("Hello ").await?;
    match cli.command {
        Some(Commands::Put { key, value }) => put(&client, &key, &value).await,
        Some(Commands::Read { key }) => read(&client, &key).await,
        Some(Commands::Delete { key }) => delete(&client, &key).await,
        Some(Commands::Verify { requests, seed }) => {
            let seed = seed.unwrap_or_else(rand::random);
            let report = verify_cluster(&client, requests, seed).await?;
            println!("Verification report (seed {}):", seed);
            println!("  Requests: {}", report.requests);
            println!("  Writes: {}", report.writes);
            println!("  Updates: {}", report.updates);
            println!("  Deletes: {}", report.deletes);
            println!("  Live keys: {}", report.live_keys);
            println!("Client tests passed.");
        }
        None => {
            println!("Greeter received: {}", greeting);
            shell(&client).await?;
        }
    }

    Ok(())
}

async fn put(client: &KvClient, key: &str, value: &str) {
    match client.put(key, value).await {
        Ok(_) => println!("Put request success."),
        Err(e) => println!("Put request failed: {}", e),
    }
}

async fn read(client: &KvClient, key: &str) {
    match client.read(key).await {
        Ok(Outcome::Ok(value)) => println!("{}", value),
        Ok(Outcome::NotFound) => println!("not found"),
        Err(e) => println!("Read request failed: {}", e),
    }
}

async fn delete(client: &KvClient, key: &str) {
    match client.delete(key).await {
        Ok(Outcome::Ok(_)) => println!("Delete request success."),
        Ok(Outcome::NotFound) => println!("not found"),
        Err(e) => println!("Delete request failed: {}", e),
    }
}

async fn shell(client: &KvClient) -> anyhow::Result<()> {
    println!("Connect established with {}", client.target());
    println!("=====================================");
    println!("(p)ut <key> <value>");
    println!("(d)elete <key>");
    println!("(r)ead <key>");
    println!("(q)uit");
    println!("=====================================");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(op) = words.next() else {
            continue;
        };
        match (op, words.next(), words.next()) {
            ("p", Some(key), Some(value)) => put(client, key, value).await,
            ("d", Some(key), _) => delete(client, key).await,
            ("r", Some(key), _) => read(client, key).await,
            ("q", _, _) => break,
            _ => println!("invalid operation !"),
        }
    }
    Ok(())
}
