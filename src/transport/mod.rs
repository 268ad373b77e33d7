//! RPC plumbing between clients, the master and data nodes
//!
//! [`KvService`] is what a node serves; [`PeerTransport`] is how a node or
//! client reaches another node by address. The gRPC implementations are
//! used by the binaries, the local ones by in-process clusters.

pub mod grpc;
pub mod local;

pub use grpc::{GrpcTransport, KvNodeGrpcService};
pub use local::LocalTransport;

use crate::common::{LogEntry, Operation, Reply, Result, SyncCode};

/// The `KvNode` surface of one process.
#[tonic::async_trait]
pub trait KvService: Send + Sync + 'static {
    /// `"datanode"` or `"master"`.
    fn role(&self) -> &'static str;

    async fn request(&self, op: Operation) -> Result<Reply>;

    async fn sync(&self, entry: LogEntry) -> SyncCode;
}

/// Outbound calls to a node by `host:port`.
#[tonic::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn hello(&self, addr: &str, name: &str) -> Result<String>;

    async fn request(&self, addr: &str, op: Operation) -> Result<Reply>;

    async fn sync(&self, addr: &str, entry: LogEntry) -> Result<SyncCode>;
}

/// Greeting returned by `SayHello`: the caller's name followed by the role.
pub fn hello_message(name: &str, role: &str) -> String {
    format!("{}{}", name, role)
}
