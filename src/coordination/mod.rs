//! Coordination service adapter
//!
//! Membership, ephemeral registration, sequence numbers and child-change
//! notifications all go through the [`Coordination`] trait. One trait object
//! is one client session: closing it removes the session's ephemeral nodes.
//!
//! Two implementations ship with the crate:
//! - [`MemorySession`] on a shared in-process [`CoordinationTree`]
//! - [`RemoteSession`] talking to a tree hosted by the master over gRPC

pub mod grpc;
pub mod membership;
pub mod tree;
pub mod watch;

pub use grpc::{CoordinationGrpcService, RemoteSession};
pub use membership::{list_members, register_data_node, shard_group_of, Member, BACKUP_MARKER};
pub use tree::{spawn_session_keepalive, spawn_session_reaper, CoordinationTree, MemorySession};
pub use watch::{spawn_membership_watch, MembershipObserver};

use crate::common::Result;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

#[tonic::async_trait]
pub trait Coordination: Send + Sync + 'static {
    /// Create `path` and its missing ancestors as persistent nodes.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    /// Create an ephemeral node owned by this session and return its path.
    /// With `sequential`, a zero-padded counter is appended to the name.
    async fn create_ephemeral(&self, path: &str, value: &str, sequential: bool) -> Result<String>;

    /// Child names of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Stream of child-change notifications for `path`. The first event is
    /// delivered immediately.
    async fn subscribe_children(&self, path: &str) -> Result<Subscription>;

    /// Value of `path`, or `None` if the node does not exist.
    async fn get_data(&self, path: &str) -> Result<Option<String>>;

    /// Next value of the monotonic counter named by `path`, starting at 1.
    async fn next_sequence(&self, path: &str) -> Result<u64>;

    /// Delete `path` and everything below it.
    async fn delete_tree(&self, path: &str) -> Result<()>;

    /// End the session.
    async fn close(&self) -> Result<()>;
}

/// Open subscription to child changes of one path. Each item is the path's
/// change counter; consecutive changes may be coalesced into one item.
pub struct Subscription {
    events: BoxStream<'static, Result<u64>>,
}

impl Subscription {
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Result<u64>> + Send + 'static,
    {
        Self {
            events: events.boxed(),
        }
    }

    /// Wait for the next change. `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Result<u64>> {
        self.events.next().await
    }
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}

/// Parent of an absolute path; `/` for top-level nodes.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
