//! Replication log
//!
//! In-memory, append-only, ordered by sequencer-assigned index. Entries
//! received from peers are only accepted past the current tail, so a
//! replica never regresses or duplicates on stale or reordered syncs.

use crate::common::{Error, LogEntry, Result};

#[derive(Debug, Default, Clone)]
pub struct ReplicationLog {
    entries: Vec<LogEntry>,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally originated entry. Its index comes fresh from the
    /// sequencer and is therefore past the tail.
    pub fn append_local(&mut self, entry: LogEntry) -> u64 {
        let index = entry.index;
        self.entries.push(entry);
        index
    }

    /// Append an entry received from a peer, if it extends the log.
    pub fn accept(&mut self, entry: LogEntry) -> Result<u64> {
        if let Some(last) = self.last_index() {
            if entry.index <= last {
                return Err(Error::SyncRejected {
                    index: entry.index,
                    last,
                });
            }
        }
        Ok(self.append_local(entry))
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Last index, or 0 for an empty log.
    pub fn version(&self) -> u64 {
        self.last_index().unwrap_or(0)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
