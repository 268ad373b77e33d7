//! Log replication to peers
//!
//! `replicate` fans one entry out to the backups in rounds until a strict
//! majority of the backup set acknowledged it or the rounds run out.
//! `push_log` streams a whole log to one target, in order, for cloning and
//! primary warm-up.

use crate::common::{LogEntry, SyncCode};
use crate::transport::PeerTransport;
use serde::Serialize;

/// Strict majority of the configured backup count. An empty backup set is
/// trivially satisfied.
pub fn quorum_reached(acks: usize, backups: usize) -> bool {
    backups == 0 || acks > backups / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuorumOutcome {
    pub acks: usize,
    pub backups: usize,
    pub rounds: usize,
    pub reached: bool,
}

/// Replicate `entry` to `backups`.
///
/// Acknowledgements accumulate across rounds; a round only resends to
/// backups that have not acknowledged yet. Every round reaches all of them,
/// and no further round starts once a majority is in.
pub async fn replicate(
    transport: &dyn PeerTransport,
    backups: &[String],
    entry: &LogEntry,
    max_rounds: usize,
) -> QuorumOutcome {
    let mut acked = vec![false; backups.len()];
    let mut acks = 0;
    let mut rounds = 0;

    while !quorum_reached(acks, backups.len()) && rounds < max_rounds {
        rounds += 1;
        for (addr, done) in backups.iter().zip(acked.iter_mut()) {
            if *done {
                continue;
            }
            match transport.sync(addr, entry.clone()).await {
                Ok(SyncCode::SyncSuccess) => {
                    *done = true;
                    acks += 1;
                }
                Ok(SyncCode::SyncFail) => {
                    tracing::debug!("{} rejected entry {} (round {})", addr, entry.index, rounds);
                }
                Err(e) => {
                    tracing::warn!(
                        "Sync of entry {} to {} failed (round {}): {}",
                        entry.index,
                        addr,
                        rounds,
                        e
                    );
                }
            }
        }
    }

    let outcome = QuorumOutcome {
        acks,
        backups: backups.len(),
        rounds,
        reached: quorum_reached(acks, backups.len()),
    };
    if !outcome.reached {
        tracing::warn!(
            "Entry {} reached {} of {} backups after {} rounds",
            entry.index,
            acks,
            backups.len(),
            rounds
        );
    }
    outcome
}

/// Result of pushing a log to one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub target: String,
    pub accepted: usize,
    pub rejected: usize,
    /// Transport error that ended the push early
    pub error: Option<String>,
}

/// Push `entries` to `target` in order. Rejected entries are ones the
/// target already has past; a transport error ends the push.
pub async fn push_log(
    transport: &dyn PeerTransport,
    entries: &[LogEntry],
    target: &str,
) -> PushReport {
    let mut report = PushReport {
        target: target.to_string(),
        ..Default::default()
    };
    for entry in entries {
        match transport.sync(target, entry.clone()).await {
            Ok(SyncCode::SyncSuccess) => report.accepted += 1,
            Ok(SyncCode::SyncFail) => report.rejected += 1,
            Err(e) => {
                tracing::warn!("Pushing log to {} stopped at entry {}: {}", target, entry.index, e);
                report.error = Some(e.to_string());
                break;
            }
        }
    }
    tracing::debug!(
        "Pushed log to {}: {} accepted, {} rejected",
        target,
        report.accepted,
        report.rejected
    );
    report
}
