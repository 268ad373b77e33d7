//! Verify a running cluster with a random workload
//!
//! Keeps a shadow dictionary and issues random request pairs against the
//! cluster, checking every read against the shadow:
//! - write a new key, then read it
//! - update an existing key, then read it
//! - delete an existing key, then read it back as missing
//!
//! With an empty shadow, updates and deletes become writes.

use crate::client::{KvClient, Outcome};
use crate::common::{random_string, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

const KEY_LEN: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub requests: usize,
    pub writes: usize,
    pub updates: usize,
    pub deletes: usize,
    /// Keys left in the cluster by the run
    pub live_keys: usize,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Write,
    Update,
    Delete,
}

pub async fn verify_cluster(client: &KvClient, requests: usize, seed: u64) -> Result<VerifyReport> {
    tracing::info!("Starting cluster verification ({} requests)", requests);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut shadow: BTreeMap<String, String> = BTreeMap::new();
    let mut report = VerifyReport::default();

    for i in 0..requests {
        let step = match rng.gen_range(0..3) {
            0 if !shadow.is_empty() => Step::Delete,
            0 | 1 if !shadow.is_empty() => Step::Update,
            _ => Step::Write,
        };

        match step {
            Step::Delete => {
                let key = pick(&mut rng, &shadow);
                shadow.remove(&key);
                if client.delete(&key).await? == Outcome::NotFound {
                    return Err(Error::VerifyFailed(format!("delete of {} found nothing", key)));
                }
                expect(client, &key, None).await?;
                report.deletes += 1;
            }
            Step::Update => {
                let key = pick(&mut rng, &shadow);
                let value = random_string(&mut rng, KEY_LEN);
                shadow.insert(key.clone(), value.clone());
                client.put(&key, &value).await?;
                expect(client, &key, Some(&value)).await?;
                report.updates += 1;
            }
            Step::Write => {
                let key = random_string(&mut rng, KEY_LEN);
                let value = random_string(&mut rng, KEY_LEN);
                shadow.insert(key.clone(), value.clone());
                client.put(&key, &value).await?;
                expect(client, &key, Some(&value)).await?;
                report.writes += 1;
            }
        }

        report.requests += 1;
        tracing::debug!("{}/{} {:?} OK", i + 1, requests, step);
    }

    report.live_keys = shadow.len();
    tracing::info!(
        "Verification passed: {} writes, {} updates, {} deletes",
        report.writes,
        report.updates,
        report.deletes
    );
    Ok(report)
}

fn pick(rng: &mut StdRng, shadow: &BTreeMap<String, String>) -> String {
    let idx = rng.gen_range(0..shadow.len());
    shadow.keys().nth(idx).cloned().unwrap_or_default()
}

async fn expect(client: &KvClient, key: &str, expected: Option<&str>) -> Result<()> {
    let outcome = client.read(key).await?;
    if outcome.value() != expected {
        return Err(Error::VerifyFailed(format!(
            "read of {} returned {:?}, expected {:?}",
            key, outcome, expected
        )));
    }
    Ok(())
}
