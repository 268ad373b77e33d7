//! Long-lived membership subscriptions
//!
//! One background task per observer. Each change event triggers a full
//! rebuild, so coalesced events lose nothing. A broken subscription is
//! re-established after a short back-off; the task runs until aborted.

use crate::common::Result;
use crate::coordination::Coordination;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(200);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Something rebuilt from the membership list on every change.
#[tonic::async_trait]
pub trait MembershipObserver: Send + Sync + 'static {
    async fn on_membership_change(&self) -> Result<()>;
}

pub fn spawn_membership_watch(
    coord: Arc<dyn Coordination>,
    path: String,
    observer: Arc<dyn MembershipObserver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = RESUBSCRIBE_DELAY;
        loop {
            let mut subscription = match coord.subscribe_children(&path).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!("Failed to watch {}: {}, retrying in {:?}", path, e, delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
                    continue;
                }
            };
            delay = RESUBSCRIBE_DELAY;

            while let Some(event) = subscription.next().await {
                match event {
                    Ok(version) => {
                        tracing::debug!("Membership of {} changed (version {})", path, version);
                        if let Err(e) = observer.on_membership_change().await {
                            tracing::warn!("Membership rebuild for {} failed: {}", path, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Watch on {} broke: {}", path, e);
                        break;
                    }
                }
            }

            tokio::time::sleep(delay).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::CoordinationTree;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[tonic::async_trait]
    impl MembershipObserver for Counter {
        async fn on_membership_change(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_for(counter: &Counter, at_least: usize) {
        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("observer called fewer than {} times", at_least);
    }

    #[tokio::test]
    async fn test_observer_runs_initially_and_on_change() {
        let tree = Arc::new(CoordinationTree::new(Duration::from_secs(10)));
        let admin: Arc<dyn Coordination> = Arc::new(tree.connect());
        admin.ensure_path("/shardkv").await.unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = spawn_membership_watch(admin.clone(), "/shardkv".into(), counter.clone());
        wait_for(&counter, 1).await;

        let node = tree.connect();
        node.create_ephemeral("/shardkv/data1", "x", false).await.unwrap();
        wait_for(&counter, 2).await;

        node.close().await.unwrap();
        wait_for(&counter, 3).await;
        handle.abort();
    }
}
