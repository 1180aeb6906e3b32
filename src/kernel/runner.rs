//! Job Runner: reserves a slot, hands the opaque workload to a
//! semaphore-bounded worker pool, and guarantees `mark_finished` plus a
//! terminal status write on every exit path — success, failure, or panic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::AdmissionError;
use crate::kernel::admission::AdmissionController;
use crate::kernel::job::{new_job_id, Job, JobStatus};
use crate::kernel::job_status::{JobStatusRecord, JobStatusStore};
use crate::kernel::store::StoreClient;

/// Handed to the workload so it can report progress without knowing
/// anything about the shared store. The workload is expected to call
/// `report` once per completed batch (e.g. every 1 000 records); the
/// reporter itself throttles actual store writes to every `progress_interval`
/// calls.
pub struct ProgressReporter<S: StoreClient> {
    status_store: Arc<JobStatusStore<S>>,
    job_id: String,
    user_id: String,
    tier_name: &'static str,
    requested_count: u64,
    started_at: chrono::DateTime<Utc>,
    progress_interval: u64,
    calls: AtomicU64,
}

impl<S: StoreClient> ProgressReporter<S> {
    pub async fn report(&self, processed_count: u64) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % self.progress_interval.max(1) != 0 {
            return;
        }
        let record = JobStatusRecord {
            job_id: self.job_id.clone(),
            status: JobStatus::InProgress,
            requested_count: self.requested_count,
            processed_count,
            started_at: self.started_at,
            message: format!("processed {processed_count} of {}", self.requested_count),
        };
        if let Err(e) = self.status_store.put(&record).await {
            warn!(
                user_id = %self.user_id,
                tier = self.tier_name,
                job_id = %self.job_id,
                error = %e,
                "failed to persist progress update"
            );
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// The unit of work handed to a worker; what it actually does is opaque to
/// the runner. Implementations report progress through the reporter and
/// return `Ok` with the final processed count, or `Err` on failure.
#[async_trait]
pub trait Workload<S: StoreClient>: Send + Sync {
    async fn run(&self, reporter: &ProgressReporter<S>) -> anyhow::Result<u64>;
}

pub struct JobRunnerConfig {
    pub worker_pool_size: usize,
    pub progress_interval: u64,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: num_cpus(),
            progress_interval: 1,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub struct JobRunner<S: StoreClient + 'static> {
    admission: Arc<AdmissionController<S>>,
    status_store: Arc<JobStatusStore<S>>,
    semaphore: Arc<Semaphore>,
    progress_interval: u64,
}

impl<S: StoreClient + 'static> JobRunner<S> {
    pub fn new(
        admission: Arc<AdmissionController<S>>,
        status_store: Arc<JobStatusStore<S>>,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            admission,
            status_store,
            semaphore: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            progress_interval: config.progress_interval,
        }
    }

    /// Reserve a slot and hand the workload to the pool. Returns the
    /// generated job id on acceptance, or propagates the admission failure
    /// (the HTTP layer never calls this step unless reservation succeeded).
    pub async fn submit(
        &self,
        user_id: &str,
        requested_count: u64,
        workload: Arc<dyn Workload<S>>,
    ) -> Result<String, AdmissionError> {
        let job_id = new_job_id();
        let tier = self
            .admission
            .check_and_reserve(user_id, requested_count, &job_id)
            .await?;

        let mut job = Job::builder()
            .job_id(job_id.clone())
            .user_id(user_id)
            .tier(tier)
            .requested_count(requested_count)
            .build();
        job.mark_in_progress();
        if let Err(e) = self.status_store.put(&JobStatusRecord::from(&job)).await {
            warn!(user_id, tier = %tier, job_id = %job_id, error = %e, "failed to write initial job status");
        }

        let admission = self.admission.clone();
        let status_store = self.status_store.clone();
        let semaphore = self.semaphore.clone();
        let progress_interval = self.progress_interval;
        let user_id_owned = user_id.to_string();
        let job_id_for_task = job_id.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                error!(job_id = %job_id_for_task, "worker pool semaphore closed, dropping job");
                return;
            };

            let reporter = ProgressReporter {
                status_store: status_store.clone(),
                job_id: job_id_for_task.clone(),
                user_id: user_id_owned.clone(),
                tier_name: tier.name(),
                requested_count,
                started_at: job.started_at,
                progress_interval,
                calls: AtomicU64::new(0),
            };

            let outcome = tokio::spawn(async move {
                let result = workload.run(&reporter).await;
                (result, reporter)
            })
            .await;

            match outcome {
                Ok((Ok(final_count), _reporter)) => {
                    job.record_progress(final_count);
                    job.mark_completed();
                    info!(user_id = %user_id_owned, tier = %tier, job_id = %job_id_for_task, "job completed");
                }
                Ok((Err(e), _reporter)) => {
                    job.mark_failed(&e.to_string());
                    warn!(user_id = %user_id_owned, tier = %tier, job_id = %job_id_for_task, error = %e, "job failed");
                }
                Err(join_err) => {
                    job.mark_failed(&format!("workload panicked: {join_err}"));
                    error!(user_id = %user_id_owned, tier = %tier, job_id = %job_id_for_task, "job panicked");
                }
            }

            if let Err(e) = status_store.put(&JobStatusRecord::from(&job)).await {
                warn!(user_id = %user_id_owned, tier = %tier, job_id = %job_id_for_task, error = %e, "failed to write terminal job status");
            }
            admission.mark_finished(&user_id_owned, tier, &job_id_for_task).await;
        });

        Ok(job_id)
    }
}
