//! Job model: created by the controller at admission, mutated only by
//! the runner, terminal on `Completed` or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::kernel::tiers::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Generate a fresh job id. Collision probability is negligible — a random
/// 128-bit UUIDv4 rendered as text.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub requested_count: u64,

    #[builder(default = 0)]
    pub processed_count: u64,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default = Utc::now())]
    pub started_at: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,

    #[builder(default = "queued".to_string())]
    pub message: String,
}

impl Job {
    pub fn progress_percent(&self) -> u8 {
        if self.requested_count == 0 {
            return 100;
        }
        let ratio = self.processed_count.min(self.requested_count) as f64
            / self.requested_count as f64;
        (ratio * 100.0).round() as u8
    }

    pub fn mark_in_progress(&mut self) {
        self.status = JobStatus::InProgress;
        self.message = "in progress".to_string();
    }

    pub fn record_progress(&mut self, processed_count: u64) {
        self.processed_count = processed_count;
        self.message = format!("processed {processed_count} of {}", self.requested_count);
    }

    pub fn mark_completed(&mut self) {
        self.processed_count = self.requested_count;
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.message = "completed".to_string();
    }

    pub fn mark_failed(&mut self, reason: &str) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.message = reason.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::builder()
            .job_id("J1")
            .user_id("u1")
            .tier(Tier::Small)
            .requested_count(50u64)
            .build()
    }

    #[test]
    fn new_job_starts_pending() {
        let job = sample();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.processed_count, 0);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn progress_percent_tracks_processed_count() {
        let mut job = sample();
        job.record_progress(25);
        assert_eq!(job.progress_percent(), 50);
    }

    #[test]
    fn mark_completed_sets_terminal_state() {
        let mut job = sample();
        job.mark_completed();
        assert!(job.status.is_terminal());
        assert_eq!(job.processed_count, job.requested_count);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn mark_failed_sets_terminal_state_and_message() {
        let mut job = sample();
        job.mark_failed("workload exploded");
        assert!(job.status.is_terminal());
        assert_eq!(job.message, "workload exploded");
    }

    #[test]
    fn zero_requested_count_is_full_progress() {
        let job = Job::builder()
            .job_id("J2")
            .user_id("u1")
            .tier(Tier::Small)
            .requested_count(0u64)
            .build();
        assert_eq!(job.progress_percent(), 100);
    }
}
