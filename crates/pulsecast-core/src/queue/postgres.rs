//! PostgreSQL-backed job queue
//!
//! Jobs live in the `jobs` table. Waiting and delayed jobs share the
//! `pending` status and are told apart by `scheduled_at`. Workers claim with
//! `FOR UPDATE SKIP LOCKED`, so several processes can share one table.
//! A job left `active` by a worker that died is reclaimed once its
//! `started_at` is older than the stall timeout.

use super::job::{next_attempt, to_chrono};
use super::{
    Backoff, JobId, JobOptions, JobPayload, JobQueue, QueueStats, QueuedJob, RetryOutcome,
    DEFAULT_STALLED_AFTER,
};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecast_common::types::CampaignId;
use pulsecast_common::{Error, Result};
use pulsecast_storage::DatabasePool;
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUEUE_NAME: &str = "campaign-messages";

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    backoff_base_ms: i64,
    last_error: Option<String>,
    scheduled_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ClaimedRow {
    #[sqlx(flatten)]
    job: JobRow,
    reclaimed: bool,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let payload: JobPayload = serde_json::from_value(row.payload)
            .map_err(|e| Error::Queue(format!("Invalid payload for job {}: {}", row.id, e)))?;

        Ok(QueuedJob {
            id: row.id,
            payload,
            attempts_made: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            backoff: Backoff::exponential(Duration::from_millis(row.backoff_base_ms.max(0) as u64)),
            due_at: row.scheduled_at,
            last_error: row.last_error,
        })
    }
}

fn queue_err(e: sqlx::Error) -> Error {
    Error::Queue(e.to_string())
}

/// Job queue stored in PostgreSQL
#[derive(Clone)]
pub struct PgJobQueue {
    db_pool: DatabasePool,
    clock: Arc<dyn Clock>,
    stalled_after: Duration,
}

impl PgJobQueue {
    pub fn new(db_pool: DatabasePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            db_pool,
            clock,
            stalled_after: DEFAULT_STALLED_AFTER,
        }
    }

    pub fn with_stalled_after(mut self, stalled_after: Duration) -> Self {
        self.stalled_after = stalled_after;
        self
    }

    async fn list_pending(&self, delayed: bool) -> Result<Vec<QueuedJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, payload, attempts, max_attempts, backoff_base_ms, last_error, scheduled_at
            FROM jobs
            WHERE queue = $1
              AND status = 'pending'
              AND (CASE WHEN $3 THEN scheduled_at > $2 ELSE scheduled_at <= $2 END)
            ORDER BY scheduled_at ASC, created_at ASC, id ASC
            "#,
        )
        .bind(QUEUE_NAME)
        .bind(self.clock.now())
        .bind(delayed)
        .fetch_all(self.db_pool.pool())
        .await
        .map_err(queue_err)?;

        rows.into_iter().map(QueuedJob::try_from).collect()
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> Result<JobId> {
        let job_id = Uuid::now_v7();
        let scheduled_at = self.clock.now() + to_chrono(options.delay);
        let campaign_id = payload.campaign_id;
        let payload = serde_json::to_value(&payload)
            .map_err(|e| Error::Queue(format!("Failed to serialize payload: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, campaign_id, payload, status, attempts, max_attempts,
                backoff_base_ms, scheduled_at, created_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, NOW())
            "#,
        )
        .bind(job_id)
        .bind(QUEUE_NAME)
        .bind(campaign_id)
        .bind(&payload)
        .bind(options.attempts.max(1) as i32)
        .bind(options.backoff.base().as_millis() as i64)
        .bind(scheduled_at)
        .execute(self.db_pool.pool())
        .await
        .map_err(queue_err)?;

        debug!(job_id = %job_id, campaign_id = %campaign_id, %scheduled_at, "Enqueued job");
        Ok(job_id)
    }

    async fn list_delayed(&self) -> Result<Vec<QueuedJob>> {
        self.list_pending(true).await
    }

    async fn list_waiting(&self) -> Result<Vec<QueuedJob>> {
        self.list_pending(false).await
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<QueuedJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, payload, attempts, max_attempts, backoff_base_ms, last_error, scheduled_at
            FROM jobs
            WHERE queue = $1 AND campaign_id = $2 AND status = 'pending'
            ORDER BY scheduled_at ASC, created_at ASC, id ASC
            "#,
        )
        .bind(QUEUE_NAME)
        .bind(campaign_id)
        .fetch_all(self.db_pool.pool())
        .await
        .map_err(queue_err)?;

        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    async fn remove(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(self.db_pool.pool())
            .await
            .map_err(queue_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(&self) -> Result<Option<QueuedJob>> {
        let now = self.clock.now();
        let claimed: Option<ClaimedRow> = sqlx::query_as(
            r#"
            WITH next AS (
                SELECT id, status = 'active' AS reclaimed
                FROM jobs
                WHERE queue = $1
                  AND (
                    (status = 'pending' AND scheduled_at <= $2)
                    OR (status = 'active' AND started_at <= $3)
                  )
                ORDER BY scheduled_at ASC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs SET status = 'active', started_at = $2
            FROM next
            WHERE jobs.id = next.id
            RETURNING jobs.id, jobs.payload, jobs.attempts, jobs.max_attempts,
                      jobs.backoff_base_ms, jobs.last_error, jobs.scheduled_at, next.reclaimed
            "#,
        )
        .bind(QUEUE_NAME)
        .bind(now)
        .bind(now - to_chrono(self.stalled_after))
        .fetch_optional(self.db_pool.pool())
        .await
        .map_err(queue_err)?;

        let Some(claimed) = claimed else {
            return Ok(None);
        };
        if claimed.reclaimed {
            warn!(job_id = %claimed.job.id, "Reclaimed stalled job");
        }
        QueuedJob::try_from(claimed.job).map(Some)
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        // Finished jobs are not kept
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.pool())
            .await
            .map_err(queue_err)?;

        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<RetryOutcome> {
        let mut tx = self.db_pool.pool().begin().await.map_err(queue_err)?;

        let (attempts, max_attempts, backoff_base_ms): (i32, i32, i64) = sqlx::query_as(
            "SELECT attempts, max_attempts, backoff_base_ms FROM jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(queue_err)?
        .ok_or_else(|| Error::Queue(format!("job {} not found", id)))?;

        let attempts_made = attempts.max(0) as u32 + 1;
        let backoff = Backoff::exponential(Duration::from_millis(backoff_base_ms.max(0) as u64));
        let outcome = next_attempt(attempts_made, max_attempts.max(1) as u32, backoff, self.clock.now());

        match outcome {
            RetryOutcome::Retrying { retry_at, attempt } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending', attempts = $2, last_error = $3, scheduled_at = $4
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(attempts_made as i32)
                .bind(error)
                .bind(retry_at)
                .execute(&mut *tx)
                .await
                .map_err(queue_err)?;

                info!("Job {} scheduled for retry at {} (attempt {})", id, retry_at, attempt);
            }
            RetryOutcome::Exhausted => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed', attempts = $2, last_error = $3, completed_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(attempts_made as i32)
                .bind(error)
                .execute(&mut *tx)
                .await
                .map_err(queue_err)?;
            }
        }

        tx.commit().await.map_err(queue_err)?;
        Ok(outcome)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let (waiting, delayed, active, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_at <= $2),
                COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_at > $2),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM jobs
            WHERE queue = $1
            "#,
        )
        .bind(QUEUE_NAME)
        .bind(self.clock.now())
        .fetch_one(self.db_pool.pool())
        .await
        .map_err(queue_err)?;

        Ok(QueueStats {
            waiting: waiting as u64,
            delayed: delayed as u64,
            active: active as u64,
            failed: failed as u64,
        })
    }
}
