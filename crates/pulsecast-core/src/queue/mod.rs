//! Durable delayed job queue
//!
//! Jobs are either waiting (due), delayed (due later), active (claimed by a
//! worker), or finished. Only waiting and delayed jobs can be removed; an
//! active job always runs to completion or failure. An active job whose
//! worker went away is handed out again once it has been held longer than
//! the stall timeout.

mod job;
mod memory;
mod postgres;

pub use job::{Backoff, JobId, JobOptions, JobPayload, QueuedJob, RetryOutcome};
pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

use async_trait::async_trait;
use pulsecast_common::types::CampaignId;
use pulsecast_common::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Default time a claimed job may stay active before it is reclaimed
pub const DEFAULT_STALLED_AFTER: Duration = Duration::from_secs(300);

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub failed: u64,
}

/// Job store contract used by the engine
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job that becomes due after `options.delay`
    async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> Result<JobId>;

    /// Jobs not yet due, earliest first
    async fn list_delayed(&self) -> Result<Vec<QueuedJob>>;

    /// Jobs due and not yet claimed, earliest first
    async fn list_waiting(&self) -> Result<Vec<QueuedJob>>;

    /// Waiting and delayed jobs of one campaign, earliest first
    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<QueuedJob>>;

    /// Remove a waiting or delayed job. Returns `false` if it is gone or active.
    async fn remove(&self, id: JobId) -> Result<bool>;

    /// Claim the earliest due job, or a stalled active one
    async fn claim_next(&self) -> Result<Option<QueuedJob>>;

    /// Finish an active job successfully
    async fn complete(&self, id: JobId) -> Result<()>;

    /// Record a failed attempt and either reschedule with backoff or give up
    async fn fail(&self, id: JobId, error: &str) -> Result<RetryOutcome>;

    async fn stats(&self) -> Result<QueueStats>;
}

/// Remove every waiting or delayed job of a campaign
///
/// A job that cannot be removed is logged and skipped; the rest of the sweep
/// continues. Returns the jobs that were removed.
pub async fn cancel_campaign_jobs(
    queue: &dyn JobQueue,
    campaign_id: CampaignId,
) -> Result<Vec<QueuedJob>> {
    let jobs = queue.list_for_campaign(campaign_id).await?;

    let mut removed = Vec::new();
    for job in jobs {
        match queue.remove(job.id).await {
            Ok(true) => removed.push(job),
            Ok(false) => debug!(job_id = %job.id, "Job already claimed or gone"),
            Err(e) => warn!(job_id = %job.id, "Failed to remove job: {}", e),
        }
    }

    Ok(removed)
}
