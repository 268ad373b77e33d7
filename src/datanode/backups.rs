//! Backup-set tracker
//!
//! Rebuilt from the membership list on every change and swapped in whole,
//! so a writer always sees one consistent set.

use crate::common::Result;
use crate::coordination::{list_members, Coordination, Member, MembershipObserver};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Replicas this node pushes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupSet {
    /// Other replicas of this node's shard group
    pub backups: Vec<String>,
    /// Every other registered member, any shard group
    pub peers: Vec<String>,
}

impl BackupSet {
    /// Derive the set for `self_addr` in shard group `shard`. Members are
    /// expected in child-name order.
    pub fn compute(members: &[Member], shard: &str, self_addr: &str) -> Self {
        let mut set = BackupSet::default();
        for member in members {
            if member.addr.is_empty() || member.addr == self_addr {
                continue;
            }
            if member.shard == shard && !set.backups.contains(&member.addr) {
                set.backups.push(member.addr.clone());
            }
            if !set.peers.contains(&member.addr) {
                set.peers.push(member.addr.clone());
            }
        }
        set
    }
}

pub struct BackupTracker {
    coord: Arc<dyn Coordination>,
    root: String,
    shard: String,
    self_addr: String,
    current: RwLock<Arc<BackupSet>>,
}

impl BackupTracker {
    pub fn new(coord: Arc<dyn Coordination>, root: &str, shard: &str, self_addr: &str) -> Self {
        Self {
            coord,
            root: root.to_string(),
            shard: shard.to_string(),
            self_addr: self_addr.to_string(),
            current: RwLock::new(Arc::new(BackupSet::default())),
        }
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn current(&self) -> Arc<BackupSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn install(&self, set: BackupSet) {
        let set = Arc::new(set);
        let previous = std::mem::replace(
            &mut *self.current.write().unwrap_or_else(PoisonError::into_inner),
            set.clone(),
        );
        if previous.backups != set.backups {
            tracing::info!(
                "Backups of {} ({}) changed: {:?} -> {:?}",
                self.shard,
                self.self_addr,
                previous.backups,
                set.backups
            );
        }
    }

    /// Re-read membership and swap in the new set.
    pub async fn rebuild(&self) -> Result<Arc<BackupSet>> {
        let members = list_members(self.coord.as_ref(), &self.root).await?;
        self.install(BackupSet::compute(&members, &self.shard, &self.self_addr));
        Ok(self.current())
    }
}

#[tonic::async_trait]
impl MembershipObserver for BackupTracker {
    async fn on_membership_change(&self) -> Result<()> {
        self.rebuild().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{register_data_node, CoordinationTree};
    use std::time::Duration;

    fn member(name: &str, addr: &str) -> Member {
        Member {
            name: name.to_string(),
            shard: crate::coordination::shard_group_of(name).to_string(),
            addr: addr.to_string(),
        }
    }

    #[test]
    fn test_compute_same_shard_only() {
        let members = vec![
            member("data1", "a:1"),
            member("data1_backup0000000001", "b:1"),
            member("data1_backup0000000002", "c:1"),
            member("data2", "d:1"),
        ];
        let set = BackupSet::compute(&members, "data1", "b:1");
        assert_eq!(set.backups, vec!["a:1", "c:1"]);
        assert_eq!(set.peers, vec!["a:1", "c:1", "d:1"]);
    }

    #[test]
    fn test_compute_excludes_self_and_empty() {
        let members = vec![member("data1", "a:1"), member("data1_backup0000000001", "")];
        let set = BackupSet::compute(&members, "data1", "a:1");
        assert!(set.backups.is_empty());
        assert!(set.peers.is_empty());
    }

    #[test]
    fn test_compute_does_not_match_shard_prefix() {
        let members = vec![member("data1", "a:1"), member("data12", "b:1")];
        let set = BackupSet::compute(&members, "data1", "x:1");
        assert_eq!(set.backups, vec!["a:1"]);
    }

    #[tokio::test]
    async fn test_rebuild_tracks_membership() {
        let tree = Arc::new(CoordinationTree::new(Duration::from_secs(10)));
        let primary: Arc<dyn Coordination> = Arc::new(tree.connect());
        register_data_node(primary.as_ref(), "/shardkv", 1, "a:1").await.unwrap();
        let tracker = BackupTracker::new(primary.clone(), "/shardkv", "data1", "a:1");

        assert!(tracker.rebuild().await.unwrap().backups.is_empty());

        let backup = tree.connect();
        register_data_node(&backup, "/shardkv", 1, "b:1").await.unwrap();
        assert_eq!(tracker.rebuild().await.unwrap().backups, vec!["b:1"]);

        backup.close().await.unwrap();
        assert!(tracker.rebuild().await.unwrap().backups.is_empty());
    }
}
