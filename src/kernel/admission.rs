//! Orchestrates cooldown check → atomic reservation → safety key write, and
//! the corresponding release.
//!
//! Ordering matters: cooldown is checked before reservation so an
//! admitted-then-blocked sequence can't occur, and the reservation script
//! runs before the safety key is written so a crash between the two just
//! leaves an orphaned set member for the expiry listener to clean up.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::AdmissionError;
use crate::kernel::keys;
use crate::kernel::store::{ReservationOutcome, StoreClient};
use crate::kernel::sweeper::SweepTargets;
use crate::kernel::tiers::{Tier, TierTable};

pub struct AdmissionController<S: StoreClient> {
    store: Arc<S>,
    tiers: TierTable,
    safety_key_ttl: Duration,
    sweep_targets: Option<Arc<SweepTargets>>,
}

impl<S: StoreClient> AdmissionController<S> {
    pub fn new(store: Arc<S>, tiers: TierTable, safety_key_ttl: Duration) -> Self {
        Self {
            store,
            tiers,
            safety_key_ttl,
            sweep_targets: None,
        }
    }

    /// Feed every successfully admitted (user, tier) pair to the optional
    /// sweeper so it knows which running-sets to scan.
    pub fn with_sweep_targets(mut self, sweep_targets: Arc<SweepTargets>) -> Self {
        self.sweep_targets = Some(sweep_targets);
        self
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Classify, gate on cooldown, then atomically reserve a slot. On
    /// success, writes the safety key and returns the tier the job was
    /// admitted under.
    pub async fn check_and_reserve(
        &self,
        user_id: &str,
        requested_count: u64,
        job_id: &str,
    ) -> Result<Tier, AdmissionError> {
        let tier = self.tiers.classify(requested_count);

        let cooldown_k = keys::cooldown_key(user_id);
        if self.store.exists(&cooldown_k).await? {
            let remaining_seconds = self.store.ttl_seconds(&cooldown_k).await?.max(0) as u64;
            let cooldown_tier = self
                .store
                .get(&cooldown_k)
                .await?
                .and_then(|v| Tier::parse(&v))
                .unwrap_or(tier);
            return Err(AdmissionError::CooldownActive {
                user_id: user_id.to_string(),
                tier: cooldown_tier,
                total_seconds: self.tiers.cooldown_seconds(cooldown_tier),
                remaining_seconds,
            });
        }

        let set_key = keys::running_set_key(user_id, tier);
        let limit = self.tiers.max_concurrent(tier);
        let outcome = self
            .store
            .run_reservation_script(&set_key, limit, job_id)
            .await?;

        if outcome == ReservationOutcome::Rejected {
            self.write_cooldown_on_rejection(user_id, tier).await;
            return Err(AdmissionError::TooManyRequests {
                user_id: user_id.to_string(),
                tier,
                limit,
            });
        }

        let safety_k = keys::safety_key(user_id, tier, job_id);
        if let Err(e) = self
            .store
            .set_with_ttl(&safety_k, tier.name(), self.safety_key_ttl)
            .await
        {
            // Safety key write failed after the reservation succeeded — the
            // controller must not leave a reservation with no safety key
            // that the user didn't get admitted for. Compensate by removing
            // the set member; if that also fails, the listener/sweeper is
            // the backstop.
            if let Err(comp_err) = self.store.set_remove(&set_key, job_id).await {
                error!(
                    user_id,
                    tier = %tier,
                    job_id,
                    error = %comp_err,
                    "failed to compensate for a failed safety-key write — orphan will be cleaned up by the expiry listener or sweeper"
                );
            }
            return Err(AdmissionError::StoreUnavailable(e));
        }

        if let Some(targets) = &self.sweep_targets {
            targets.record(user_id, tier).await;
        }

        Ok(tier)
    }

    /// Default policy: cooldown is written only when a reservation is
    /// rejected for being over the concurrency limit, never on normal
    /// completion. An alternative policy is documented in DESIGN.md.
    async fn write_cooldown_on_rejection(&self, user_id: &str, tier: Tier) {
        let cooldown_seconds = self.tiers.cooldown_seconds(tier);
        if cooldown_seconds == 0 {
            return;
        }
        let cooldown_k = keys::cooldown_key(user_id);
        if let Err(e) = self
            .store
            .set_with_ttl(&cooldown_k, tier.name(), Duration::from_secs(cooldown_seconds))
            .await
        {
            warn!(user_id, tier = %tier, error = %e, "failed to write cooldown key after rejection");
        }
    }

    /// Release a reservation. Idempotent and safe to call even when the
    /// reservation never succeeded — every operation here is itself
    /// idempotent. Failures are logged and dropped: the expiry listener is
    /// the backstop for anything this call can't clean up.
    pub async fn mark_finished(&self, user_id: &str, tier: Tier, job_id: &str) {
        let safety_k = keys::safety_key(user_id, tier, job_id);
        if let Err(e) = self.store.delete(&safety_k).await {
            warn!(user_id, tier = %tier, job_id, error = %e, "failed to delete safety key");
        }

        let set_key = keys::running_set_key(user_id, tier);
        if let Err(e) = self.store.set_remove(&set_key, job_id).await {
            warn!(user_id, tier = %tier, job_id, error = %e, "failed to remove job from running set");
        }
    }
}
