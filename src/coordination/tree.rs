//! In-memory coordination namespace
//!
//! A hierarchical tree of nodes with:
//! - sessions, kept alive by activity and expired by a reaper task
//! - ephemeral nodes owned by a session and removed with it
//! - sequential names (`<name><10-digit counter>`, counter kept per parent)
//! - named monotonic counters for log sequence numbers
//! - per-path child watches, carried as a change counter

use crate::common::{Error, Result};
use crate::coordination::{join_path, parent_of, Coordination, Subscription};
use futures_util::Stream;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug)]
struct Znode {
    value: String,
    /// Owning session for ephemeral nodes
    owner: Option<String>,
    /// Counter for sequential children
    next_child_seq: u64,
}

#[derive(Default)]
struct TreeState {
    nodes: BTreeMap<String, Znode>,
    sessions: HashMap<String, Instant>,
    counters: HashMap<String, u64>,
    watches: HashMap<String, watch::Sender<u64>>,
}

impl TreeState {
    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>> {
        if !self.exists(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| &p[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn notify_children_changed(&self, parent: &str) {
        if let Some(tx) = self.watches.get(parent) {
            tx.send_modify(|version| *version += 1);
        }
    }

    fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.notify_children_changed(parent_of(path));
        }
    }

    fn delete_recursive(&mut self, path: &str) -> Result<()> {
        for child in self.list_children(path)? {
            self.delete_recursive(&join_path(path, &child))?;
        }
        if path != "/" {
            self.remove(path);
        }
        Ok(())
    }

    fn drop_session(&mut self, session_id: &str) -> usize {
        self.sessions.remove(session_id);
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner.as_deref() == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.remove(path);
        }
        owned.len()
    }
}

fn validate_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(Error::Coordination(format!("invalid path: {:?}", path)))
    }
}

/// Shared coordination namespace. Wrap in an `Arc` and hand out sessions
/// with [`CoordinationTree::connect`].
pub struct CoordinationTree {
    state: Mutex<TreeState>,
    session_timeout: Duration,
}

impl CoordinationTree {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(TreeState::default()),
            session_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Open an in-process session.
    pub fn connect(self: &Arc<Self>) -> MemorySession {
        MemorySession {
            session_id: self.open_session(),
            tree: self.clone(),
        }
    }

    pub fn open_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.state().sessions.insert(id.clone(), Instant::now());
        tracing::debug!("Opened coordination session {}", id);
        id
    }

    pub fn keep_alive(&self, session_id: &str) -> Result<()> {
        match self.state().sessions.get_mut(session_id) {
            Some(last_seen) => {
                *last_seen = Instant::now();
                Ok(())
            }
            None => Err(Error::SessionExpired(session_id.to_string())),
        }
    }

    /// Close a session and remove its ephemeral nodes. Returns the number of
    /// nodes removed.
    pub fn close_session(&self, session_id: &str) -> usize {
        let removed = self.state().drop_session(session_id);
        tracing::debug!(
            "Closed coordination session {} ({} ephemeral nodes removed)",
            session_id,
            removed
        );
        removed
    }

    /// Expire every session idle for longer than the session timeout.
    pub fn expire_sessions(&self) -> Vec<String> {
        let mut state = self.state();
        let now = Instant::now();
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > self.session_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            let removed = state.drop_session(id);
            tracing::info!(
                "Coordination session {} expired ({} ephemeral nodes removed)",
                id,
                removed
            );
        }
        expired
    }

    pub fn ensure_path(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut state = self.state();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let parent = if current.is_empty() {
                "/".to_string()
            } else {
                current.clone()
            };
            current = join_path(&parent, part);
            if let Some(node) = state.nodes.get(&current) {
                if node.owner.is_some() && current != path {
                    return Err(Error::Coordination(format!(
                        "ephemeral node {} cannot have children",
                        current
                    )));
                }
                continue;
            }
            state.nodes.insert(
                current.clone(),
                Znode {
                    value: String::new(),
                    owner: None,
                    next_child_seq: 0,
                },
            );
            state.notify_children_changed(&parent);
        }
        Ok(())
    }

    /// Create a node. `owner` makes it ephemeral to that session.
    pub fn create(
        &self,
        path: &str,
        value: &str,
        owner: Option<&str>,
        sequential: bool,
    ) -> Result<String> {
        validate_path(path)?;
        if path == "/" {
            return Err(Error::NodeExists(path.to_string()));
        }
        let mut state = self.state();
        if let Some(owner) = owner {
            if !state.sessions.contains_key(owner) {
                return Err(Error::SessionExpired(owner.to_string()));
            }
        }

        let parent = parent_of(path).to_string();
        let seq = match state.nodes.get_mut(&parent) {
            Some(node) if node.owner.is_some() => {
                return Err(Error::Coordination(format!(
                    "ephemeral node {} cannot have children",
                    parent
                )))
            }
            Some(node) => {
                let seq = node.next_child_seq;
                node.next_child_seq += 1;
                seq
            }
            None if parent == "/" => 0,
            None => return Err(Error::NoNode(parent)),
        };

        let path = if sequential {
            format!("{}{:010}", path, seq)
        } else {
            path.to_string()
        };
        if state.nodes.contains_key(&path) {
            return Err(Error::NodeExists(path));
        }
        state.nodes.insert(
            path.clone(),
            Znode {
                value: value.to_string(),
                owner: owner.map(str::to_string),
                next_child_seq: 0,
            },
        );
        state.notify_children_changed(&parent);
        Ok(path)
    }

    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path)?;
        self.state().list_children(path)
    }

    pub fn get_data(&self, path: &str) -> Option<String> {
        self.state().nodes.get(path).map(|node| node.value.clone())
    }

    pub fn next_sequence(&self, path: &str) -> u64 {
        let mut state = self.state();
        let counter = state.counters.entry(path.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn delete_tree(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.state().delete_recursive(path)
    }

    /// Watch children of `path`. The path need not exist yet.
    pub fn subscribe(&self, path: &str) -> watch::Receiver<u64> {
        self.state()
            .watches
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}

/// Stream of change counters from a watch receiver, starting with the
/// current value.
pub fn version_stream(mut rx: watch::Receiver<u64>) -> impl Stream<Item = u64> + Send + 'static {
    async_stream::stream! {
        loop {
            let version = *rx.borrow_and_update();
            yield version;
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Periodically expire idle sessions.
pub fn spawn_session_reaper(tree: Arc<CoordinationTree>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = (tree.session_timeout() / 2).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            tree.expire_sessions();
        }
    })
}

/// Keep an in-process session alive while its owner sits idle. Stops once
/// the session is gone.
pub fn spawn_session_keepalive(
    tree: Arc<CoordinationTree>,
    session_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = (tree.session_timeout() / 3).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = tree.keep_alive(&session_id) {
                tracing::warn!("Stopped keeping session alive: {}", e);
                break;
            }
        }
    })
}

/// In-process session on a [`CoordinationTree`]. Every call counts as
/// session activity; calls on an expired session fail.
pub struct MemorySession {
    tree: Arc<CoordinationTree>,
    session_id: String,
}

impl MemorySession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tree(&self) -> &Arc<CoordinationTree> {
        &self.tree
    }

    fn touch(&self) -> Result<()> {
        self.tree.keep_alive(&self.session_id)
    }
}

#[tonic::async_trait]
impl Coordination for MemorySession {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        self.touch()?;
        self.tree.ensure_path(path)
    }

    async fn create_ephemeral(&self, path: &str, value: &str, sequential: bool) -> Result<String> {
        self.touch()?;
        self.tree
            .create(path, value, Some(&self.session_id), sequential)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.touch()?;
        self.tree.children(path)
    }

    async fn subscribe_children(&self, path: &str) -> Result<Subscription> {
        validate_path(path)?;
        self.touch()?;
        let rx = self.tree.subscribe(path);
        Ok(Subscription::new(futures_util::StreamExt::map(
            version_stream(rx),
            Ok,
        )))
    }

    async fn get_data(&self, path: &str) -> Result<Option<String>> {
        self.touch()?;
        Ok(self.tree.get_data(path))
    }

    async fn next_sequence(&self, path: &str) -> Result<u64> {
        self.touch()?;
        Ok(self.tree.next_sequence(path))
    }

    async fn delete_tree(&self, path: &str) -> Result<()> {
        self.touch()?;
        self.tree.delete_tree(path)
    }

    async fn close(&self) -> Result<()> {
        self.tree.close_session(&self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Arc<CoordinationTree> {
        Arc::new(CoordinationTree::new(Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_ephemeral_removed_on_close() {
        let tree = tree();
        let admin = tree.connect();
        let node = tree.connect();
        admin.ensure_path("/shardkv").await.unwrap();

        node.create_ephemeral("/shardkv/data1", "127.0.0.1:1", false)
            .await
            .unwrap();
        assert_eq!(admin.children("/shardkv").await.unwrap(), vec!["data1"]);
        assert_eq!(
            admin.get_data("/shardkv/data1").await.unwrap().as_deref(),
            Some("127.0.0.1:1")
        );

        node.close().await.unwrap();
        assert!(admin.children("/shardkv").await.unwrap().is_empty());
        assert_eq!(admin.get_data("/shardkv/data1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_name_and_sequential_fallback() {
        let tree = tree();
        let a = tree.connect();
        let b = tree.connect();
        a.ensure_path("/shardkv").await.unwrap();

        a.create_ephemeral("/shardkv/data1", "a", false).await.unwrap();
        let err = b
            .create_ephemeral("/shardkv/data1", "b", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeExists(_)));

        let first = b
            .create_ephemeral("/shardkv/data1_backup", "b", true)
            .await
            .unwrap();
        let second = b
            .create_ephemeral("/shardkv/data1_backup", "c", true)
            .await
            .unwrap();
        assert!(first.starts_with("/shardkv/data1_backup"));
        assert_eq!(first.len(), "/shardkv/data1_backup".len() + 10);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let tree = tree();
        let s = tree.connect();
        let err = s.create_ephemeral("/missing/data1", "x", false).await.unwrap_err();
        assert!(matches!(err, Error::NoNode(_)));
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic_per_name() {
        let tree = tree();
        let a = tree.connect();
        let b = tree.connect();
        assert_eq!(a.next_sequence("/shardkv").await.unwrap(), 1);
        assert_eq!(b.next_sequence("/shardkv").await.unwrap(), 2);
        assert_eq!(a.next_sequence("/shardkv").await.unwrap(), 3);
        assert_eq!(a.next_sequence("/other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_tree_removes_subtree() {
        let tree = tree();
        let s = tree.connect();
        s.ensure_path("/shardkv/a/b").await.unwrap();
        s.ensure_path("/shardkv/c").await.unwrap();
        s.create_ephemeral("/shardkv/data1", "x", false).await.unwrap();

        s.delete_tree("/shardkv").await.unwrap();
        assert!(s.children("/").await.unwrap().is_empty());
        assert!(matches!(
            s.children("/shardkv").await,
            Err(Error::NoNode(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_fires_on_join_and_leave() {
        let tree = tree();
        let admin = tree.connect();
        admin.ensure_path("/shardkv").await.unwrap();
        let mut sub = admin.subscribe_children("/shardkv").await.unwrap();

        // Initial event is immediate.
        let initial = sub.next().await.unwrap().unwrap();

        let node = tree.connect();
        node.create_ephemeral("/shardkv/data1", "x", false).await.unwrap();
        let joined = sub.next().await.unwrap().unwrap();
        assert!(joined > initial);

        node.close().await.unwrap();
        let left = sub.next().await.unwrap().unwrap();
        assert!(left > joined);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let tree = Arc::new(CoordinationTree::new(Duration::from_millis(20)));
        let admin = tree.connect();
        admin.ensure_path("/shardkv").await.unwrap();
        let node = tree.connect();
        node.create_ephemeral("/shardkv/data1", "x", false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        admin.children("/shardkv").await.unwrap();
        let expired = tree.expire_sessions();
        assert_eq!(expired, vec![node.session_id().to_string()]);
        assert!(admin.children("/shardkv").await.unwrap().is_empty());

        let err = node
            .create_ephemeral("/shardkv/data1", "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
        let err = node.children("/shardkv").await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
        let err = node.next_sequence("/shardkv/sequence").await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_keepalive_outlives_idle_timeout() {
        let tree = Arc::new(CoordinationTree::new(Duration::from_millis(30)));
        let idle = tree.connect();
        let keepalive = spawn_session_keepalive(tree.clone(), idle.session_id().to_string());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tree.expire_sessions().is_empty());
        idle.ensure_path("/shardkv").await.unwrap();

        keepalive.abort();
        idle.close().await.unwrap();
    }

    #[test]
    fn test_invalid_paths() {
        let tree = tree();
        assert!(tree.ensure_path("relative").is_err());
        assert!(tree.ensure_path("/a//b").is_err());
        assert!(tree.ensure_path("/a/").is_err());
    }
}
