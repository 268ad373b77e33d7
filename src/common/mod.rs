//! Common utilities and types shared across shardkv

pub mod config;
pub mod error;
pub mod hash;
pub mod types;
pub mod utils;

pub use config::{
    Config, ConsistencyPolicy, DataNodeConfig, MasterConfig, ReadPolicy, ReplicationPolicy,
};
pub use error::{Error, Result};
pub use hash::{shard_group_for_key, shard_group_name, shard_key};
pub use types::{LogEntry, OpKind, Operation, Reply, SyncCode};
pub use utils::{
    parse_duration, random_string, retry_with_backoff, shutdown_signal, timestamp_now,
};
