//! # shardkv
//!
//! A sharded, primary-backup replicated key-value store with:
//! - a master that maps keys to shard groups and redirects clients
//! - per-shard replication logs, ordered by a cluster-wide sequencer
//! - quorum replication of writes from a shard primary to its backups
//! - failover by log version and full-log cloning for joining replicas
//! - membership driven by a coordination service hosted on the master
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────┐
//!   client ────► │           Master             │
//!   (redirect)   │  routing table + coordination│
//!                └──────────┬───────────────────┘
//!                           │ membership / sequencer
//!        ┌──────────────────┼───────────────────┐
//!   ┌────▼─────┐      ┌─────▼────┐        ┌─────▼────┐
//!   │ data1    │ sync │ data1_   │        │ data2    │
//!   │ primary  ├─────►│ backup.. │        │ primary  │
//!   │ log+dict │      │ log+dict │        │ log+dict │
//!   └──────────┘      └──────────┘        └──────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the master
//! ```bash
//! shardkv-master serve --grpc 0.0.0.0:50051
//! ```
//!
//! ### Start data nodes
//! ```bash
//! shardkv-datanode serve --shard 1 --bind 0.0.0.0:50052 \
//!   --advertise 127.0.0.1:50052 --coordinator 127.0.0.1:50051
//! shardkv-datanode serve --shard 1 --bind 0.0.0.0:50053 \
//!   --advertise 127.0.0.1:50053 --coordinator 127.0.0.1:50051
//! ```
//!
//! ### Use the CLI
//! ```bash
//! shardkv --target 127.0.0.1:50051          # interactive: p/d/r/q
//! shardkv --target 127.0.0.1:50051 put a 1
//! shardkv --target 127.0.0.1:50051 verify -n 100
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod coordination;
pub mod datanode;
pub mod master;
pub mod ops;
pub mod transport;

// Re-export commonly used types
pub use client::{KvClient, Outcome};
pub use common::{Config, Error, Result};
pub use datanode::DataNodeServer;
pub use master::MasterServer;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("shardkv");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
