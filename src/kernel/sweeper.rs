//! Periodic sweeper: a best-effort backstop for the expiry listener.
//!
//! Expiry notifications are best-effort, so this task periodically scans
//! each known running-set and removes members whose safety key is absent —
//! tightening the recovery bound beyond "eventually, when a notification
//! happens to arrive". The sweep interval must stay longer than any real
//! job's expected duration or it will race live reservations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::kernel::keys;
use crate::kernel::store::StoreClient;
use crate::kernel::tiers::Tier;

/// Registry of (user, tier) pairs the sweeper has seen admitted at least
/// once, so it knows which running-set keys to scan without ever falling
/// back to a store-wide key scan, which would not be O(1).
#[derive(Default)]
pub struct SweepTargets {
    pairs: RwLock<HashSet<(String, Tier)>>,
}

impl SweepTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, user_id: &str, tier: Tier) {
        self.pairs.write().await.insert((user_id.to_string(), tier));
    }

    async fn snapshot(&self) -> Vec<(String, Tier)> {
        self.pairs.read().await.iter().cloned().collect()
    }
}

pub struct Sweeper<S: StoreClient> {
    store: Arc<S>,
    targets: Arc<SweepTargets>,
    interval: Duration,
}

impl<S: StoreClient> Sweeper<S> {
    pub fn new(store: Arc<S>, targets: Arc<SweepTargets>, interval: Duration) -> Self {
        Self {
            store,
            targets,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    pub async fn sweep_once(&self) {
        let targets = self.targets.snapshot().await;
        debug!(targets = targets.len(), "sweeper scanning running sets");

        for (user_id, tier) in targets {
            let set_key = keys::running_set_key(&user_id, tier);
            let members = match self.store.set_members(&set_key).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(user_id, tier = %tier, error = %e, "sweeper failed to read running set");
                    continue;
                }
            };

            for job_id in members {
                let safety_k = keys::safety_key(&user_id, tier, &job_id);
                match self.store.exists(&safety_k).await {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Err(e) = self.store.set_remove(&set_key, &job_id).await {
                            warn!(user_id, tier = %tier, job_id, error = %e, "sweeper failed to remove orphan");
                        } else {
                            info!(user_id, tier = %tier, job_id, "sweeper removed orphaned reservation");
                        }
                    }
                    Err(e) => {
                        warn!(user_id, tier = %tier, job_id, error = %e, "sweeper failed to probe safety key");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::store::tests_support::FakeStoreClient;

    #[tokio::test]
    async fn sweeps_orphaned_member_with_no_safety_key() {
        let store = Arc::new(FakeStoreClient::new());
        let targets = Arc::new(SweepTargets::new());
        targets.record("u1", Tier::Small).await;

        store
            .run_reservation_script("user:u1:SMALL:jobs", 10, "orphan-job")
            .await
            .unwrap();
        // No safety key written — simulates a crash between script and
        // safety-key write.

        let sweeper = Sweeper::new(store.clone(), targets, Duration::from_secs(60));
        sweeper.sweep_once().await;

        assert_eq!(store.set_cardinality("user:u1:SMALL:jobs").await, 0);
    }

    #[tokio::test]
    async fn live_reservation_with_safety_key_survives_sweep() {
        let store = Arc::new(FakeStoreClient::new());
        let targets = Arc::new(SweepTargets::new());
        targets.record("u1", Tier::Small).await;

        store
            .run_reservation_script("user:u1:SMALL:jobs", 10, "live-job")
            .await
            .unwrap();
        store
            .set_with_ttl("job:u1:SMALL:live-job", "SMALL", Duration::from_secs(900))
            .await
            .unwrap();

        let sweeper = Sweeper::new(store.clone(), targets, Duration::from_secs(60));
        sweeper.sweep_once().await;

        assert_eq!(store.set_cardinality("user:u1:SMALL:jobs").await, 1);
    }
}
