//! Job Status Store: a jobId → status-record mapping backed by the
//! same shared store, under its own key namespace so it never collides with
//! the admission key families. Writes are last-writer-wins; reads
//! return the latest value or absent.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::job::{Job, JobStatus};
use crate::kernel::keys;
use crate::kernel::store::{StoreClient, StoreError};

/// Snapshot persisted under `jobstatus:{jobId}`. Deliberately smaller than
/// [`Job`] — it's the read-facing projection, not the runner's working copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub requested_count: u64,
    pub processed_count: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

impl From<&Job> for JobStatusRecord {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            requested_count: job.requested_count,
            processed_count: job.processed_count,
            started_at: job.started_at,
            message: job.message.clone(),
        }
    }
}

/// How long a status record outlives a terminal job, so `GET /jobs/{jobId}`
/// keeps answering for a while after completion without growing unboundedly.
const STATUS_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub struct JobStatusStore<S: StoreClient> {
    store: Arc<S>,
}

impl<S: StoreClient> JobStatusStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn put(&self, record: &JobStatusRecord) -> Result<(), StoreError> {
        let key = keys::job_status_key(&record.job_id);
        let value = serde_json::to_string(record)
            .expect("JobStatusRecord serialization is infallible");
        self.store.set_with_ttl(&key, &value, STATUS_RETENTION).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobStatusRecord>, StoreError> {
        let key = keys::job_status_key(job_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::store::tests_support::FakeStoreClient;
    use crate::kernel::tiers::Tier;

    fn sample_job() -> Job {
        Job::builder()
            .job_id("J1")
            .user_id("u1")
            .tier(Tier::Small)
            .requested_count(50u64)
            .build()
    }

    #[tokio::test]
    async fn round_trips_a_status_record() {
        let store = JobStatusStore::new(Arc::new(FakeStoreClient::new()));
        let job = sample_job();
        store.put(&JobStatusRecord::from(&job)).await.unwrap();

        let loaded = store.get("J1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.requested_count, 50);
    }

    #[tokio::test]
    async fn absent_job_id_returns_none() {
        let store = JobStatusStore::new(Arc::new(FakeStoreClient::new()));
        assert!(store.get("never-existed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn later_write_overwrites_earlier_one() {
        let store = JobStatusStore::new(Arc::new(FakeStoreClient::new()));
        let mut job = sample_job();
        store.put(&JobStatusRecord::from(&job)).await.unwrap();

        job.mark_in_progress();
        job.record_progress(25);
        store.put(&JobStatusRecord::from(&job)).await.unwrap();

        let loaded = store.get("J1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::InProgress);
        assert_eq!(loaded.processed_count, 25);
    }
}
