//! Shard routing
//!
//! The routing table maps each shard group to the address of its primary.
//! It is rebuilt from the membership list on every change:
//! 1. query every replica's log version
//! 2. pick the most advanced replica per shard, keeping the previous
//!    primary on ties
//! 3. clone the previous primary's log onto replicas that just joined
//! 4. swap the table in and tell every primary to warm its backups
//!
//! Keyed requests are answered with a redirect to the key's primary.

use crate::common::{shard_group_for_key, Error, LogEntry, Operation, Reply, Result, SyncCode};
use crate::coordination::{list_members, Coordination, Member, MembershipObserver};
use crate::transport::{KvService, PeerTransport};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    primaries: BTreeMap<String, String>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shard: impl Into<String>, addr: impl Into<String>) {
        self.primaries.insert(shard.into(), addr.into());
    }

    pub fn primary(&self, shard: &str) -> Option<&str> {
        self.primaries.get(shard).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.primaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.primaries.iter().map(|(s, a)| (s.as_str(), a.as_str()))
    }

    /// Shard group serving `key` with `shard_count` groups, and its primary.
    pub fn key_to_node(&self, key: &str, shard_count: Option<u32>) -> Result<(String, &str)> {
        if self.is_empty() {
            return Err(Error::NoShardsAvailable);
        }
        let count = shard_count.map(u64::from).unwrap_or(self.len() as u64);
        let shard = shard_group_for_key(key, count);
        match self.primary(&shard) {
            Some(addr) => Ok((shard, addr)),
            None => Err(Error::ShardUnavailable(shard)),
        }
    }
}

/// A member and its reported log version; `None` if it could not be asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub member: Member,
    pub version: Option<u64>,
}

/// Choose one primary per shard: highest log version wins, ties keep
/// whoever was considered first. The previous primaries are considered
/// first, then everyone else by child name.
pub fn select_primaries(previous: &RoutingTable, candidates: &[Candidate]) -> RoutingTable {
    let is_incumbent =
        |c: &Candidate| previous.primary(&c.member.shard) == Some(c.member.addr.as_str());

    let mut ordered: Vec<&Candidate> = candidates.iter().filter(|c| is_incumbent(*c)).collect();
    let mut rest: Vec<&Candidate> = candidates.iter().filter(|c| !is_incumbent(*c)).collect();
    rest.sort_by(|a, b| a.member.name.cmp(&b.member.name));
    ordered.extend(rest);

    let mut chosen: BTreeMap<&str, (&str, u64)> = BTreeMap::new();
    for candidate in ordered {
        let Some(version) = candidate.version else {
            continue;
        };
        let shard = candidate.member.shard.as_str();
        let addr = candidate.member.addr.as_str();
        match chosen.get(shard) {
            Some(&(_, best)) if version <= best => {}
            _ => {
                chosen.insert(shard, (addr, version));
            }
        }
    }

    let mut table = RoutingTable::new();
    for (shard, (addr, _)) in chosen {
        table.insert(shard, addr);
    }
    table
}

/// Clones to run after a membership change, as `(source, target)` pairs.
///
/// A shard group absent from the previous table takes over part of the key
/// space, so every previous primary that is still a member copies its log
/// onto every replica of the new group. A replica that joined an existing
/// group is cloned from that group's previous primary.
pub fn plan_clones(
    previous_addrs: &HashSet<String>,
    previous: &RoutingTable,
    members: &[Member],
) -> Vec<(String, String)> {
    let current: HashSet<&str> = members.iter().map(|m| m.addr.as_str()).collect();
    let sources: Vec<&str> = previous
        .iter()
        .map(|(_, addr)| addr)
        .filter(|addr| current.contains(addr))
        .collect();

    let mut clones: Vec<(String, String)> = Vec::new();
    let mut push = |source: &str, target: &str| {
        if source != target && !clones.iter().any(|(s, t)| s == source && t == target) {
            clones.push((source.to_string(), target.to_string()));
        }
    };
    for member in members {
        match previous.primary(&member.shard) {
            None => {
                for &source in &sources {
                    push(source, member.addr.as_str());
                }
            }
            Some(source) => {
                if !previous_addrs.contains(&member.addr) && current.contains(source) {
                    push(source, member.addr.as_str());
                }
            }
        }
    }
    clones
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub primaries: RoutingTable,
    pub members: Vec<Member>,
    pub shard_count: usize,
}

#[derive(Default)]
struct Membership {
    members: Vec<Member>,
    addrs: HashSet<String>,
}

/// The master's `KvNode` service and routing-table owner.
pub struct Router {
    coord: Arc<dyn Coordination>,
    transport: Arc<dyn PeerTransport>,
    root: String,
    shard_count: Option<u32>,
    table: RwLock<Arc<RoutingTable>>,
    membership: RwLock<Membership>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl Router {
    pub fn new(
        coord: Arc<dyn Coordination>,
        transport: Arc<dyn PeerTransport>,
        root: &str,
        shard_count: Option<u32>,
    ) -> Self {
        Self {
            coord,
            transport,
            root: root.to_string(),
            shard_count,
            table: RwLock::new(Arc::new(RoutingTable::new())),
            membership: RwLock::new(Membership::default()),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> RouterStatus {
        let table = self.table();
        let members = self
            .membership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .clone();
        RouterStatus {
            shard_count: self.shard_count.map(|c| c as usize).unwrap_or(table.len()),
            primaries: (*table).clone(),
            members,
        }
    }

    /// Primary address for `key`.
    pub fn key_to_node(&self, key: &str) -> Result<String> {
        let table = self.table();
        let (_, addr) = table.key_to_node(key, self.shard_count)?;
        Ok(addr.to_string())
    }

    async fn log_version(&self, addr: &str) -> Option<u64> {
        match self.transport.request(addr, Operation::log_version()).await {
            Ok(Reply::Ok(version)) => match version.parse() {
                Ok(version) => Some(version),
                Err(_) => {
                    tracing::warn!("{} reported bad log version {:?}", addr, version);
                    None
                }
            },
            Ok(other) => {
                tracing::warn!("{} answered log version query with {:?}", addr, other);
                None
            }
            Err(e) => {
                tracing::warn!("Log version query to {} failed: {}", addr, e);
                None
            }
        }
    }

    /// Rebuild the routing table from current membership.
    pub async fn rebuild(&self) -> Result<Arc<RoutingTable>> {
        let _guard = self.rebuild_lock.lock().await;

        let members = list_members(self.coord.as_ref(), &self.root).await?;
        let previous = self.table();
        let previous_addrs = self
            .membership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .addrs
            .clone();

        let mut candidates = Vec::with_capacity(members.len());
        for member in &members {
            candidates.push(Candidate {
                version: self.log_version(&member.addr).await,
                member: member.clone(),
            });
        }
        let table = select_primaries(&previous, &candidates);

        for (source, target) in plan_clones(&previous_addrs, &previous, &members) {
            tracing::info!("Cloning {} onto {}", source, target);
            match self
                .transport
                .request(&source, Operation::clone_to(target.as_str()))
                .await
            {
                Ok(Reply::Ok(_)) => {}
                Ok(other) => tracing::warn!("Clone {} -> {} answered {:?}", source, target, other),
                Err(e) => tracing::warn!("Clone {} -> {} failed: {}", source, target, e),
            }
        }

        let table = Arc::new(table);
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table.clone();
        *self
            .membership
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Membership {
            addrs: members.iter().map(|m| m.addr.clone()).collect(),
            members,
        };

        if *table != *previous {
            tracing::info!("Routing table changed: {:?}", table.primaries);
        }

        for (shard, addr) in table.iter() {
            if let Err(e) = self.transport.request(addr, Operation::become_primary()).await {
                tracing::warn!("BecomePrimary to {} ({}) failed: {}", addr, shard, e);
            }
        }

        Ok(table)
    }
}

#[tonic::async_trait]
impl KvService for Router {
    fn role(&self) -> &'static str {
        "master"
    }

    async fn request(&self, op: Operation) -> Result<Reply> {
        if !op.kind.is_keyed() {
            return Err(Error::ProtocolViolation(format!(
                "master does not serve {} requests",
                op.kind
            )));
        }
        let addr = self.key_to_node(&op.key)?;
        tracing::debug!("Redirecting {} {:?} to {}", op.kind, op.key, addr);
        Ok(Reply::Redirect(addr))
    }

    async fn sync(&self, entry: LogEntry) -> SyncCode {
        tracing::warn!("Master refused sync of entry {}", entry.index);
        SyncCode::SyncFail
    }
}

#[tonic::async_trait]
impl MembershipObserver for Router {
    async fn on_membership_change(&self) -> Result<()> {
        self.rebuild().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::shard_group_of;

    fn candidate(name: &str, addr: &str, version: Option<u64>) -> Candidate {
        Candidate {
            member: Member {
                name: name.to_string(),
                shard: shard_group_of(name).to_string(),
                addr: addr.to_string(),
            },
            version,
        }
    }

    #[test]
    fn test_highest_version_wins() {
        let candidates = vec![
            candidate("data1", "a", Some(3)),
            candidate("data1_backup0000000000", "b", Some(7)),
            candidate("data2", "c", Some(1)),
        ];
        let table = select_primaries(&RoutingTable::new(), &candidates);
        assert_eq!(table.primary("data1"), Some("b"));
        assert_eq!(table.primary("data2"), Some("c"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_tie_keeps_incumbent() {
        let candidates = vec![
            candidate("data1", "a", Some(5)),
            candidate("data1_backup0000000000", "b", Some(5)),
        ];
        let fresh = select_primaries(&RoutingTable::new(), &candidates);
        assert_eq!(fresh.primary("data1"), Some("a"));

        let mut previous = RoutingTable::new();
        previous.insert("data1", "b");
        let table = select_primaries(&previous, &candidates);
        assert_eq!(table.primary("data1"), Some("b"));
    }

    #[test]
    fn test_unreachable_replica_is_skipped() {
        let candidates = vec![
            candidate("data1", "a", None),
            candidate("data1_backup0000000000", "b", Some(0)),
        ];
        let table = select_primaries(&RoutingTable::new(), &candidates);
        assert_eq!(table.primary("data1"), Some("b"));
    }

    #[test]
    fn test_key_to_node_is_deterministic() {
        let mut table = RoutingTable::new();
        table.insert("data1", "a");
        table.insert("data2", "b");
        for i in 0..50 {
            let key = format!("key{}", i);
            let first = table.key_to_node(&key, None).unwrap();
            let second = table.key_to_node(&key, None).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.0, shard_group_for_key(&key, 2));
        }
    }

    #[test]
    fn test_key_to_node_errors() {
        let table = RoutingTable::new();
        assert!(matches!(
            table.key_to_node("k", None),
            Err(Error::NoShardsAvailable)
        ));

        let mut table = RoutingTable::new();
        table.insert("data1", "a");
        // With a fixed count of 4, some keys land on shards without a primary.
        let missing = (0..100)
            .map(|i| table.key_to_node(&format!("k{}", i), Some(4)))
            .filter(|r| matches!(r, Err(Error::ShardUnavailable(_))))
            .count();
        assert!(missing > 0);
    }

    #[test]
    fn test_plan_clones_for_joiners() {
        let members: Vec<Member> = vec![
            candidate("data1", "a", None).member,
            candidate("data1_backup0000000000", "b", None).member,
        ];
        let mut previous = RoutingTable::new();
        previous.insert("data1", "a");
        let previous_addrs: HashSet<String> = ["a".to_string()].into_iter().collect();

        let clones = plan_clones(&previous_addrs, &previous, &members);
        assert_eq!(clones, vec![("a".to_string(), "b".to_string())]);
        // Nothing new on the next round.
        let previous_addrs: HashSet<String> =
            ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!(plan_clones(&previous_addrs, &previous, &members).is_empty());
    }

    #[test]
    fn test_plan_clones_for_new_shard_group() {
        let members: Vec<Member> = vec![
            candidate("data1", "a", None).member,
            candidate("data2", "b", None).member,
            candidate("data3", "c", None).member,
            candidate("data3_backup0000000000", "d", None).member,
        ];
        let mut previous = RoutingTable::new();
        previous.insert("data1", "a");
        previous.insert("data2", "b");
        let previous_addrs: HashSet<String> =
            ["a".to_string(), "b".to_string()].into_iter().collect();

        let clones = plan_clones(&previous_addrs, &previous, &members);
        let pair = |s: &str, t: &str| (s.to_string(), t.to_string());
        assert_eq!(
            clones,
            vec![pair("a", "c"), pair("b", "c"), pair("a", "d"), pair("b", "d")]
        );
    }

    #[test]
    fn test_plan_clones_empty_previous_table() {
        let members: Vec<Member> = vec![
            candidate("data1", "a", None).member,
            candidate("data2", "b", None).member,
        ];
        let clones = plan_clones(&HashSet::new(), &RoutingTable::new(), &members);
        assert!(clones.is_empty());
    }

    #[test]
    fn test_plan_clones_skips_departed_source() {
        let members: Vec<Member> = vec![candidate("data1_backup0000000001", "b", None).member];
        let mut previous = RoutingTable::new();
        previous.insert("data1", "a");
        let previous_addrs: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert!(plan_clones(&previous_addrs, &previous, &members).is_empty());
    }
}
