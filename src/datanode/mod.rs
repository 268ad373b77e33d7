//! Data node implementation
//!
//! One replica of one shard group:
//! - replication log and in-memory dictionary
//! - quorum replication of client writes to the shard's backups
//! - passive sync from the primary, full-log cloning and warm-up
//! - backup set tracked from coordination membership

pub mod backups;
pub mod engine;
pub mod http;
pub mod log;
pub mod replicator;
pub mod server;

pub use backups::{BackupSet, BackupTracker};
pub use engine::{DataNodeEngine, DataNodeStatus};
pub use log::ReplicationLog;
pub use replicator::{push_log, quorum_reached, replicate, PushReport, QuorumOutcome};
pub use server::{DataNode, DataNodeServer};

use crate::coordination::join_path;

/// Name of the cluster-wide sequence counter under the membership root.
pub const SEQUENCE_COUNTER: &str = "sequence";

/// Counter path handing out log indices.
pub fn sequence_path(root: &str) -> String {
    join_path(root, SEQUENCE_COUNTER)
}
