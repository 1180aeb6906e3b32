//! Thin contract over the external shared k/v store.
//!
//! Business logic never talks to Redis directly — it only sees
//! [`StoreClient`]. This keeps the admission controller and expiry listener
//! testable against an in-memory fake (see [`tests_support::FakeStoreClient`])
//! and keeps the store's failure behavior (timeouts, connection loss) in one
//! place.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Outcome of the atomic reservation script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Allowed,
    Rejected,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
}

/// Abstract contract over the shared k/v store. Every call is
/// idempotent unless noted; failures are surfaced, never retried here.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Returns 0 if the key is absent or has no expiry.
    async fn ttl_seconds(&self, key: &str) -> Result<i64, StoreError>;
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Must be O(1) — never implemented via key scanning.
    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError>;
    async fn run_reservation_script(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> Result<ReservationOutcome, StoreError>;
    /// Returns the members of a set, for the optional sweeper.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    /// Long-lived subscription to key-expiry notifications filtered to keys
    /// starting with `prefix_filter`. Delivery is best-effort: duplicates,
    /// reordering, and drops are all possible and must be tolerated by the
    /// caller.
    async fn subscribe_key_expiry(
        &self,
        prefix_filter: &'static str,
    ) -> Result<mpsc::Receiver<String>, StoreError>;
}

/// Lua body for the atomic reservation script. `KEYS[1]` is the
/// running-set, `ARGV[1]` the concurrency limit, `ARGV[2]` the member to
/// admit. Redis executes scripts atomically with respect to other commands
/// touching the same keys, so this sequence can't race with a concurrent
/// reservation on the same (user, tier) pair.
const RESERVATION_SCRIPT: &str = r#"
local current = redis.call('SCARD', KEYS[1])
if current >= tonumber(ARGV[1]) then
  return 0
end
redis.call('SADD', KEYS[1], ARGV[2])
return 1
"#;

/// Redis-backed implementation of [`StoreClient`].
///
/// Every call is bounded by `call_timeout`, independent of any workload
/// timeout — store unavailability must never hang a request thread.
pub struct RedisStoreClient {
    conn: ConnectionManager,
    pubsub_client: redis::Client,
    call_timeout: Duration,
    script: redis::Script,
}

impl RedisStoreClient {
    pub async fn connect(redis_url: &str, call_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            conn,
            pubsub_client: client,
            call_timeout,
            script: redis::Script::new(RESERVATION_SCRIPT),
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e)),
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        }
    }
}

#[async_trait]
impl StoreClient for RedisStoreClient {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let n: i64 = self
            .with_timeout(redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await?;
        Ok(n > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(redis::cmd("DEL").arg(key).query_async::<()>(&mut conn))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn ttl_seconds(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = self
            .with_timeout(redis::cmd("TTL").arg(key).query_async(&mut conn))
            .await?;
        Ok(ttl.max(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(
            redis::cmd("SADD")
                .arg(key)
                .arg(member)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(
            redis::cmd("SREM")
                .arg(key)
                .arg(member)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(redis::cmd("SCARD").arg(key).query_async(&mut conn))
            .await
    }

    async fn run_reservation_script(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> Result<ReservationOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .with_timeout(
                self.script
                    .key(set_key)
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(if result == 1 {
            ReservationOutcome::Allowed
        } else {
            ReservationOutcome::Rejected
        })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(redis::cmd("SMEMBERS").arg(key).query_async(&mut conn))
            .await
    }

    async fn subscribe_key_expiry(
        &self,
        prefix_filter: &'static str,
    ) -> Result<mpsc::Receiver<String>, StoreError> {
        let client = self.pubsub_client.clone();
        let (tx, rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.psubscribe("__keyevent@*__:expired").await {
                            error!(error = %e, "failed to subscribe to key-expiry events");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = futures::StreamExt::next(&mut stream).await {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "malformed expiry payload, skipping");
                                    continue;
                                }
                            };
                            if !payload.starts_with(prefix_filter) {
                                continue;
                            }
                            if tx.send(payload).await.is_err() {
                                return; // receiver dropped, stop the subscription
                            }
                        }
                        warn!("key-expiry subscription stream ended, reconnecting");
                    }
                    Err(e) => {
                        error!(error = %e, "failed to open pub/sub connection, retrying");
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        Ok(rx)
    }
}

/// In-memory fake of [`StoreClient`] for unit tests: swaps the Redis
/// infrastructure for a plain in-memory implementation behind the same
/// trait. TTLs are recorded but not counted down in real time — tests that
/// care about expiry simulate it by calling `delete` directly, the same way
/// a crashed process would leave nothing behind for the key to expire from.
#[cfg(test)]
pub mod tests_support {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        strings: HashMap<String, (String, Duration)>,
        sets: HashMap<String, HashSet<String>>,
    }

    pub struct FakeStoreClient {
        inner: Mutex<Inner>,
        fail_set_with_ttl: Mutex<HashSet<String>>,
    }

    impl FakeStoreClient {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner::default()),
                fail_set_with_ttl: Mutex::new(HashSet::new()),
            }
        }

        pub async fn contains_key(&self, key: &str) -> bool {
            self.inner.lock().await.strings.contains_key(key)
        }

        pub async fn set_cardinality(&self, key: &str) -> u64 {
            self.inner
                .lock()
                .await
                .sets
                .get(key)
                .map(|s| s.len() as u64)
                .unwrap_or(0)
        }

        /// Make the next `set_with_ttl` call for `key` fail, so callers can
        /// exercise compensation logic that only runs on a store write
        /// failure.
        pub async fn fail_next_set_with_ttl(&self, key: &str) {
            self.fail_set_with_ttl.lock().await.insert(key.to_string());
        }
    }

    impl Default for FakeStoreClient {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl StoreClient for FakeStoreClient {
        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            if self.fail_set_with_ttl.lock().await.remove(key) {
                return Err(StoreError::Timeout(Duration::from_secs(1)));
            }
            self.inner
                .lock()
                .await
                .strings
                .insert(key.to_string(), (value.to_string(), ttl));
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.inner.lock().await.strings.contains_key(key))
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.lock().await.strings.remove(key);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .strings
                .get(key)
                .map(|(v, _)| v.clone()))
        }

        async fn ttl_seconds(&self, key: &str) -> Result<i64, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .strings
                .get(key)
                .map(|(_, ttl)| ttl.as_secs() as i64)
                .unwrap_or(0))
        }

        async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.inner
                .lock()
                .await
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string());
            Ok(())
        }

        async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
            if let Some(set) = self.inner.lock().await.sets.get_mut(key) {
                set.remove(member);
            }
            Ok(())
        }

        async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .sets
                .get(key)
                .map(|s| s.len() as u64)
                .unwrap_or(0))
        }

        async fn run_reservation_script(
            &self,
            set_key: &str,
            limit: u32,
            member: &str,
        ) -> Result<ReservationOutcome, StoreError> {
            let mut inner = self.inner.lock().await;
            let set = inner.sets.entry(set_key.to_string()).or_default();
            if set.len() as u32 >= limit {
                Ok(ReservationOutcome::Rejected)
            } else {
                set.insert(member.to_string());
                Ok(ReservationOutcome::Allowed)
            }
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        }

        async fn subscribe_key_expiry(
            &self,
            _prefix_filter: &'static str,
        ) -> Result<mpsc::Receiver<String>, StoreError> {
            // Tests drive cleanup directly via `handle_expired_key` rather
            // than through a simulated subscription.
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn reservation_script_enforces_limit() {
        let fake = FakeStoreClient::new();
        assert_eq!(
            fake.run_reservation_script("s", 1, "a").await.unwrap(),
            ReservationOutcome::Allowed
        );
        assert_eq!(
            fake.run_reservation_script("s", 1, "b").await.unwrap(),
            ReservationOutcome::Rejected
        );
        assert_eq!(fake.set_cardinality("s").await.unwrap(), 1);
    }
}
