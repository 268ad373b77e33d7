//! Configuration for shardkv components
//!
//! Loaded from an optional TOML file plus `SHARDKV__*` environment
//! variables (e.g. `SHARDKV__DATANODE__SHARD_ID=2`). Command-line flags are
//! applied on top by the binaries.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Master-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterConfig>,

    /// Data node config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datanode: Option<DataNodeConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path` (if given and present) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("SHARDKV").separator("__"))
            .build()?;
        let mut config: Config = settings.try_deserialize()?;
        if config.log_level.is_empty() {
            config.log_level = default_log_level();
        }
        if let Some(node) = &config.datanode {
            node.validate()?;
        }
        Ok(config)
    }
}

/// Master (routing tier) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for gRPC (KvNode redirect + coordination service)
    #[serde(default = "default_master_grpc")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the status HTTP API
    #[serde(default = "default_master_http")]
    pub http_addr: Option<SocketAddr>,

    /// Membership root in the coordination namespace
    #[serde(default = "default_membership_root")]
    pub membership_root: String,

    /// Fixed shard count; the live routing table size when unset
    #[serde(default)]
    pub shard_count: Option<u32>,

    /// Coordination sessions idle longer than this expire
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// Timeout for calls to data nodes
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Timeout for clone and primary warm-up calls, which push whole logs
    #[serde(default = "default_bulk_timeout")]
    pub bulk_timeout_ms: u64,
}

fn default_master_grpc() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50051))
}
fn default_master_http() -> Option<SocketAddr> {
    Some(SocketAddr::from(([0, 0, 0, 0], 8051)))
}
fn default_membership_root() -> String {
    "/shardkv".to_string()
}
fn default_session_timeout() -> u64 {
    10_000
}
fn default_rpc_timeout() -> u64 {
    2_000
}
fn default_bulk_timeout() -> u64 {
    300_000
}
fn default_connect_timeout() -> u64 {
    1_000
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_master_grpc(),
            http_addr: default_master_http(),
            membership_root: default_membership_root(),
            shard_count: None,
            session_timeout_ms: default_session_timeout(),
            rpc_timeout_ms: default_rpc_timeout(),
            bulk_timeout_ms: default_bulk_timeout(),
        }
    }
}

impl MasterConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }
}

/// Data node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNodeConfig {
    /// Shard group number (registers as `data<shard_id>`)
    #[serde(default = "default_shard_id")]
    pub shard_id: u32,

    /// Bind address for gRPC
    #[serde(default = "default_datanode_bind")]
    pub bind_addr: SocketAddr,

    /// Address registered in the coordination service (`host:port`)
    #[serde(default = "default_advertise")]
    pub advertise_addr: String,

    /// Bind address for the status HTTP API
    #[serde(default)]
    pub http_addr: Option<SocketAddr>,

    /// Master address hosting the coordination service
    #[serde(default = "default_coordinator")]
    pub coordinator: String,

    /// Membership root in the coordination namespace
    #[serde(default = "default_membership_root")]
    pub membership_root: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Bound on every outbound sync / peer request
    #[serde(default = "default_rpc_timeout")]
    pub sync_timeout_ms: u64,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    #[serde(default)]
    pub replication: ReplicationPolicy,
}

fn default_shard_id() -> u32 {
    1
}
fn default_datanode_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50052))
}
fn default_advertise() -> String {
    "127.0.0.1:50052".to_string()
}
fn default_coordinator() -> String {
    "127.0.0.1:50051".to_string()
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            shard_id: default_shard_id(),
            bind_addr: default_datanode_bind(),
            advertise_addr: default_advertise(),
            http_addr: None,
            coordinator: default_coordinator(),
            membership_root: default_membership_root(),
            connect_timeout_ms: default_connect_timeout(),
            sync_timeout_ms: default_rpc_timeout(),
            session_timeout_ms: default_session_timeout(),
            replication: ReplicationPolicy::default(),
        }
    }
}

impl DataNodeConfig {
    /// Reject settings no data node can run with.
    pub fn validate(&self) -> Result<()> {
        if self.shard_id == 0 {
            return Err(Error::InvalidConfig(
                "shard_id must be at least 1".to_string(),
            ));
        }
        self.replication.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// What a writer is told when replication misses its majority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyPolicy {
    /// Apply and acknowledge regardless of quorum.
    #[default]
    BestEffort,
    /// Apply, but answer `Failed` when no majority acknowledged.
    QuorumRequired,
}

/// Whether reads wait for the write lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Reads bypass the write lock and may observe an in-flight write.
    #[default]
    Relaxed,
    /// Reads are serialized with writes and passive syncs.
    Serialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    #[serde(default)]
    pub consistency: ConsistencyPolicy,

    #[serde(default)]
    pub reads: ReadPolicy,

    /// Fan-out rounds before giving up on a majority
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    3
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            consistency: ConsistencyPolicy::default(),
            reads: ReadPolicy::default(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl ReplicationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(Error::InvalidConfig(
                "replication.max_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
