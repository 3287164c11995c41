//! In-process job queue driven by a [`Clock`]

use super::job::{next_attempt, to_chrono};
use super::{
    JobId, JobOptions, JobPayload, JobQueue, QueueStats, QueuedJob, RetryOutcome,
    DEFAULT_STALLED_AFTER,
};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecast_common::types::CampaignId;
use pulsecast_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Active,
    Failed,
}

#[derive(Debug)]
struct Entry {
    job: QueuedJob,
    state: EntryState,
    claimed_at: Option<DateTime<Utc>>,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<JobId, Entry>,
    next_seq: u64,
}

impl Inner {
    fn pending_sorted(&self, due: impl Fn(DateTime<Utc>) -> bool) -> Vec<QueuedJob> {
        let mut entries: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.state == EntryState::Pending && due(e.job.due_at))
            .collect();
        entries.sort_by_key(|e| (e.job.due_at, e.seq));
        entries.into_iter().map(|e| e.job.clone()).collect()
    }
}

/// Job queue held in memory
///
/// Completed jobs are dropped; permanently failed jobs are kept for
/// inspection.
#[derive(Debug, Clone)]
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    stalled_after: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stalled_after: DEFAULT_STALLED_AFTER,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn with_stalled_after(mut self, stalled_after: Duration) -> Self {
        self.stalled_after = stalled_after;
        self
    }

    /// Waiting and delayed jobs of a campaign, earliest first
    pub async fn pending_for(&self, campaign_id: CampaignId) -> Vec<QueuedJob> {
        self.inner
            .lock()
            .await
            .pending_sorted(|_| true)
            .into_iter()
            .filter(|j| j.payload.campaign_id == campaign_id)
            .collect()
    }

    /// Due time of the earliest pending job
    pub async fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.state == EntryState::Pending)
            .map(|e| e.job.due_at)
            .min()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> Result<JobId> {
        let id = Uuid::now_v7();
        let job = QueuedJob {
            id,
            payload,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            backoff: options.backoff,
            due_at: self.clock.now() + to_chrono(options.delay),
            last_error: None,
        };

        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id,
            Entry {
                job,
                state: EntryState::Pending,
                claimed_at: None,
                seq,
            },
        );
        Ok(id)
    }

    async fn list_delayed(&self) -> Result<Vec<QueuedJob>> {
        let now = self.clock.now();
        Ok(self.inner.lock().await.pending_sorted(|due| due > now))
    }

    async fn list_waiting(&self) -> Result<Vec<QueuedJob>> {
        let now = self.clock.now();
        Ok(self.inner.lock().await.pending_sorted(|due| due <= now))
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<QueuedJob>> {
        Ok(self.pending_for(campaign_id).await)
    }

    async fn remove(&self, id: JobId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removable = matches!(
            inner.entries.get(&id),
            Some(entry) if entry.state == EntryState::Pending
        );
        if removable {
            inner.entries.remove(&id);
        }
        Ok(removable)
    }

    async fn claim_next(&self) -> Result<Option<QueuedJob>> {
        let now = self.clock.now();
        let stalled_before = now - to_chrono(self.stalled_after);
        let mut inner = self.inner.lock().await;
        let next = inner
            .entries
            .values_mut()
            .filter(|e| match e.state {
                EntryState::Pending => e.job.due_at <= now,
                EntryState::Active => e.claimed_at.is_some_and(|at| at <= stalled_before),
                EntryState::Failed => false,
            })
            .min_by_key(|e| (e.job.due_at, e.seq));

        Ok(next.map(|entry| {
            entry.state = EntryState::Active;
            entry.claimed_at = Some(now);
            entry.job.clone()
        }))
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        self.inner
            .lock()
            .await
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::Queue(format!("job {} not found", id)))
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<RetryOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::Queue(format!("job {} not found", id)))?;

        entry.job.attempts_made += 1;
        entry.job.last_error = Some(error.to_string());

        let outcome = next_attempt(
            entry.job.attempts_made,
            entry.job.max_attempts,
            entry.job.backoff,
            now,
        );
        match outcome {
            RetryOutcome::Retrying { retry_at, .. } => {
                entry.job.due_at = retry_at;
                entry.state = EntryState::Pending;
                entry.claimed_at = None;
            }
            RetryOutcome::Exhausted => entry.state = EntryState::Failed,
        }
        Ok(outcome)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for entry in inner.entries.values() {
            match entry.state {
                EntryState::Pending if entry.job.due_at <= now => stats.waiting += 1,
                EntryState::Pending => stats.delayed += 1,
                EntryState::Active => stats.active += 1,
                EntryState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::cancel_campaign_jobs;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn payload(campaign_id: CampaignId, recipient: &str) -> JobPayload {
        JobPayload {
            instance_name: "sales-1".to_string(),
            recipient: recipient.to_string(),
            text: "Hi".to_string(),
            campaign_id,
            message_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            media_url: None,
            media_type: None,
        }
    }

    fn delayed(secs: u64) -> JobOptions {
        JobOptions::default().with_delay(Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn test_jobs_become_due_with_the_clock() {
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock.clone()));
        let campaign = Uuid::new_v4();

        queue.enqueue(payload(campaign, "a"), delayed(0)).await.unwrap();
        queue.enqueue(payload(campaign, "b"), delayed(10)).await.unwrap();

        assert_eq!(queue.list_waiting().await.unwrap().len(), 1);
        assert_eq!(queue.list_delayed().await.unwrap().len(), 1);

        let first = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(first.payload.recipient, "a");
        assert!(queue.claim_next().await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(10));
        let second = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(second.payload.recipient, "b");
    }

    #[tokio::test]
    async fn test_equal_due_times_keep_submission_order() {
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock));
        let campaign = Uuid::new_v4();
        for recipient in ["a", "b", "c"] {
            queue.enqueue(payload(campaign, recipient), delayed(0)).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = queue.claim_next().await.unwrap() {
            order.push(job.payload.recipient.clone());
            queue.complete(job.id).await.unwrap();
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_fail_retries_with_backoff_then_exhausts() {
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock.clone()));
        queue
            .enqueue(payload(Uuid::new_v4(), "a"), JobOptions::default())
            .await
            .unwrap();

        let job = queue.claim_next().await.unwrap().unwrap();
        let outcome = queue.fail(job.id, "timeout").await.unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::Retrying {
                attempt: 2,
                retry_at: clock.now() + chrono::Duration::seconds(2)
            }
        );
        assert!(queue.claim_next().await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(2));
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 1);
        assert!(matches!(
            queue.fail(job.id, "timeout").await.unwrap(),
            RetryOutcome::Retrying { attempt: 3, .. }
        ));

        clock.advance(chrono::Duration::seconds(4));
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(queue.fail(job.id, "timeout").await.unwrap(), RetryOutcome::Exhausted);
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_touches_one_campaign() {
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock));
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();

        queue.enqueue(payload(target, "a"), delayed(0)).await.unwrap();
        queue.enqueue(payload(target, "b"), delayed(30)).await.unwrap();
        queue.enqueue(payload(other, "c"), delayed(5)).await.unwrap();

        let active = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(active.payload.recipient, "a");

        let removed = cancel_campaign_jobs(&queue, target).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].payload.recipient, "b");
        assert!(queue.pending_for(target).await.is_empty());
        assert_eq!(queue.pending_for(other).await.len(), 1);
        assert!(!queue.remove(active.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_job_is_claimed_again() {
        let clock = ManualClock::default();
        let queue = MemoryJobQueue::new(Arc::new(clock.clone()))
            .with_stalled_after(Duration::from_secs(60));
        let campaign = Uuid::new_v4();
        queue.enqueue(payload(campaign, "a"), delayed(0)).await.unwrap();

        // The worker that claimed it never reports back
        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert!(queue.claim_next().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().active, 1);

        clock.advance(chrono::Duration::seconds(59));
        assert!(queue.claim_next().await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(1));
        let reclaimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.attempts_made, 0);

        // Freshly claimed again, so not handed out twice
        assert!(queue.claim_next().await.unwrap().is_none());
        queue.complete(reclaimed.id).await.unwrap();
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }
}
