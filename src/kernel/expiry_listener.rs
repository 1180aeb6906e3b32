//! Subscribes to key-expiry notifications and repairs orphaned reservations.
//!
//! Expiry delivery is best-effort: this listener must tolerate duplicate
//! deliveries, out-of-order deliveries, and missed deliveries. The cleanup
//! logic itself is a pure function of one expired key name so it can run
//! identically from the subscription loop, from the sweeper, or from a test.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::kernel::keys;
use crate::kernel::store::StoreClient;

pub const SAFETY_KEY_PREFIX: &str = "job:";

/// Handle one expired key. Returns `true` if it was recognized as a safety
/// key and a cleanup was attempted (regardless of whether the store call
/// itself succeeded).
pub async fn handle_expired_key<S: StoreClient>(store: &S, expired_key: &str) -> bool {
    let Some((user_id, tier, job_id)) = keys::parse_safety_key(expired_key) else {
        debug!(key = expired_key, "ignoring malformed or unknown expiry event");
        return false;
    };

    let set_key = keys::running_set_key(&user_id, tier);
    match store.set_remove(&set_key, &job_id).await {
        Ok(()) => {
            info!(user_id, tier = %tier, job_id, "cleaned up orphaned reservation after safety-key expiry");
        }
        Err(e) => {
            warn!(user_id, tier = %tier, job_id, error = %e, "failed to remove orphaned set member");
        }
    }
    true
}

/// Long-running service wrapping a [`StoreClient`]'s expiry subscription.
pub struct ExpiryListener<S: StoreClient> {
    store: Arc<S>,
}

impl<S: StoreClient + 'static> ExpiryListener<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run until the subscription channel closes (which, per
    /// [`StoreClient::subscribe_key_expiry`], only happens if the store
    /// itself gives up reconnecting — in practice this runs forever).
    pub async fn run(self) -> Result<(), crate::kernel::store::StoreError> {
        let mut rx = self.store.subscribe_key_expiry(SAFETY_KEY_PREFIX).await?;
        info!("expiry listener subscribed to key-expiry notifications");

        while let Some(expired_key) = rx.recv().await {
            handle_expired_key(self.store.as_ref(), &expired_key).await;
        }

        warn!("expiry subscription channel closed");
        Ok(())
    }
}
