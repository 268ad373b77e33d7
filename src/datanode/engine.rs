//! Data node engine
//!
//! Owns the replication log and the dictionary of one replica:
//! - client writes: sequence, log, replicate to a quorum, apply
//! - passive syncs from the shard primary: accept if past the tail, apply
//! - log pushes for cloning and primary warm-up
//!
//! One async mutex serializes the write path and the sync path. Applying
//! the log tail requires its guard.

use crate::common::{
    ConsistencyPolicy, Error, LogEntry, OpKind, Operation, ReadPolicy, ReplicationPolicy, Reply,
    Result, SyncCode,
};
use crate::coordination::Coordination;
use crate::datanode::backups::BackupTracker;
use crate::datanode::log::ReplicationLog;
use crate::datanode::replicator::{push_log, replicate, PushReport};
use crate::transport::{KvService, PeerTransport};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard};

/// Snapshot served by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct DataNodeStatus {
    pub shard: String,
    pub addr: String,
    pub last_index: Option<u64>,
    pub log_len: usize,
    pub keys: usize,
    pub backups: Vec<String>,
    pub replication: ReplicationPolicy,
}

pub struct DataNodeEngine {
    log: RwLock<ReplicationLog>,
    dict: RwLock<HashMap<String, String>>,
    write_lock: Mutex<()>,
    sequencer: Arc<dyn Coordination>,
    sequence_path: String,
    backups: Arc<BackupTracker>,
    transport: Arc<dyn PeerTransport>,
    policy: ReplicationPolicy,
}

impl DataNodeEngine {
    pub fn new(
        backups: Arc<BackupTracker>,
        sequencer: Arc<dyn Coordination>,
        sequence_path: String,
        transport: Arc<dyn PeerTransport>,
        policy: ReplicationPolicy,
    ) -> Self {
        Self {
            log: RwLock::new(ReplicationLog::new()),
            dict: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            sequencer,
            sequence_path,
            backups,
            transport,
            policy,
        }
    }

    fn log(&self) -> RwLockReadGuard<'_, ReplicationLog> {
        self.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_mut(&self) -> RwLockWriteGuard<'_, ReplicationLog> {
        self.log.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn dict(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.dict.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn dict_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.dict.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn shard(&self) -> &str {
        self.backups.shard()
    }

    pub fn addr(&self) -> &str {
        self.backups.self_addr()
    }

    pub fn backups(&self) -> &Arc<BackupTracker> {
        &self.backups
    }

    /// Last log index, 0 when the log is empty.
    pub fn version(&self) -> u64 {
        self.log().version()
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log().entries().to_vec()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.dict().get(key).cloned()
    }

    pub fn dict_snapshot(&self) -> HashMap<String, String> {
        self.dict().clone()
    }

    pub fn status(&self) -> DataNodeStatus {
        let (last_index, log_len) = {
            let log = self.log();
            (log.last_index(), log.len())
        };
        DataNodeStatus {
            shard: self.shard().to_string(),
            addr: self.addr().to_string(),
            last_index,
            log_len,
            keys: self.dict().len(),
            backups: self.backups.current().backups.clone(),
            replication: self.policy,
        }
    }

    /// Apply the tail of the log to the dictionary.
    fn apply_last(&self, _guard: &MutexGuard<'_, ()>) -> Result<Reply> {
        let Some(op) = self.log().last_entry().and_then(|e| e.request.clone()) else {
            return Ok(Reply::ok());
        };
        match op.kind {
            OpKind::Put => {
                let reply = Reply::Ok(format!("{}:{}", op.key, op.value));
                self.dict_mut().insert(op.key, op.value);
                Ok(reply)
            }
            OpKind::Delete => match self.dict_mut().remove(&op.key) {
                Some(_) => Ok(Reply::ok()),
                None => Ok(Reply::NotFound),
            },
            other => Err(Error::ProtocolViolation(format!(
                "cannot apply {} operation",
                other
            ))),
        }
    }

    async fn read(&self, key: &str) -> Reply {
        let _guard = match self.policy.reads {
            ReadPolicy::Serialized => Some(self.write_lock.lock().await),
            ReadPolicy::Relaxed => None,
        };
        match self.get(key) {
            Some(value) => Reply::Ok(value),
            None => Reply::NotFound,
        }
    }

    async fn next_sequence(&self) -> Result<u64> {
        self.sequencer.next_sequence(&self.sequence_path).await
    }

    async fn write(&self, op: Operation) -> Result<Reply> {
        if !op.kind.is_mutation() {
            return Err(Error::ProtocolViolation(format!(
                "{} is not a write",
                op.kind
            )));
        }
        let guard = self.write_lock.lock().await;

        let index = self.next_sequence().await?;
        let entry = LogEntry::new(index, op);
        self.log_mut().append_local(entry.clone());

        let backups = self.backups.current();
        let outcome = replicate(
            self.transport.as_ref(),
            &backups.backups,
            &entry,
            self.policy.max_rounds,
        )
        .await;

        let reply = self.apply_last(&guard)?;

        match self.next_sequence().await {
            Ok(index) => {
                self.log_mut().append_local(LogEntry::placeholder(index));
            }
            Err(e) => tracing::warn!("No placeholder after entry {}: {}", entry.index, e),
        }

        if !outcome.reached && self.policy.consistency == ConsistencyPolicy::QuorumRequired {
            let err = Error::QuorumNotReached {
                acks: outcome.acks,
                backups: outcome.backups,
            };
            return Ok(Reply::Failed(err.to_string()));
        }
        Ok(reply)
    }

    /// Push the whole log to every current backup.
    async fn become_primary(&self) -> Vec<PushReport> {
        let _guard = self.write_lock.lock().await;
        let entries = self.log_entries();
        let backups = self.backups.current();
        tracing::info!(
            "{} is primary of {}, warming {} backups with {} entries",
            self.addr(),
            self.shard(),
            backups.backups.len(),
            entries.len()
        );

        let mut reports = Vec::with_capacity(backups.backups.len());
        for backup in &backups.backups {
            reports.push(push_log(self.transport.as_ref(), &entries, backup).await);
        }
        reports
    }

    /// Push the whole log to `target`.
    async fn clone_to(&self, target: &str) -> Reply {
        if target.is_empty() {
            return Reply::Failed("clone target missing".into());
        }
        if target == self.addr() {
            return Reply::ok();
        }
        let _guard = self.write_lock.lock().await;
        let entries = self.log_entries();
        tracing::info!("Cloning {} entries to {}", entries.len(), target);

        let report = push_log(self.transport.as_ref(), &entries, target).await;
        match report.error {
            Some(e) => Reply::Failed(e),
            None => Reply::Ok(report.accepted.to_string()),
        }
    }

    /// Shutdown hand-off: a node without backups pushes its log to every
    /// other member so the data outlives it. Returns one report per peer.
    pub async fn handoff_before_exit(&self) -> Vec<PushReport> {
        let set = self.backups.current();
        if !set.backups.is_empty() || set.peers.is_empty() {
            return Vec::new();
        }
        // Peers may be handing off to us at the same time; push without the lock.
        let entries = {
            let _guard = self.write_lock.lock().await;
            self.log_entries()
        };
        tracing::info!(
            "No backups for {}, handing {} entries to {} peers",
            self.shard(),
            entries.len(),
            set.peers.len()
        );

        let mut reports = Vec::with_capacity(set.peers.len());
        for peer in &set.peers {
            reports.push(push_log(self.transport.as_ref(), &entries, peer).await);
        }
        reports
    }
}

#[tonic::async_trait]
impl KvService for DataNodeEngine {
    fn role(&self) -> &'static str {
        "datanode"
    }

    async fn request(&self, op: Operation) -> Result<Reply> {
        match op.kind {
            OpKind::Read => Ok(self.read(&op.key).await),
            OpKind::LogVersionQuery => Ok(Reply::Ok(self.version().to_string())),
            OpKind::BecomePrimary => {
                self.become_primary().await;
                Ok(Reply::ok())
            }
            OpKind::CloneTo => Ok(self.clone_to(&op.value).await),
            OpKind::Put | OpKind::Delete => self.write(op).await,
        }
    }

    async fn sync(&self, entry: LogEntry) -> SyncCode {
        if let Some(op) = entry.request.as_ref().filter(|op| !op.kind.is_mutation()) {
            tracing::warn!("{} refused synced {} entry {}", self.addr(), op.kind, entry.index);
            return SyncCode::SyncFail;
        }
        let guard = self.write_lock.lock().await;
        let index = entry.index;
        if let Err(e) = self.log_mut().accept(entry) {
            tracing::debug!("{} refused sync: {}", self.addr(), e);
            return SyncCode::SyncFail;
        }
        if let Err(e) = self.apply_last(&guard) {
            tracing::warn!("{} could not apply synced entry {}: {}", self.addr(), index, e);
        }
        SyncCode::SyncSuccess
    }
}
