//! Per-recipient message repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateMessage, Message, MessageStatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecast_common::types::{CampaignId, MessageId};
use pulsecast_common::Result;
use sqlx::Row;
use uuid::Uuid;

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, input: CreateMessage) -> Result<Message>;
    async fn get(&self, id: MessageId) -> Result<Option<Message>>;
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>>;
    /// Pending messages in contact-list order
    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Message>>;
    async fn mark_sent(
        &self,
        id: MessageId,
        gateway_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Overwrite status with `FAILED`, bump the attempt counter and keep the error
    async fn mark_failed(&self, id: MessageId, error: &str) -> Result<()>;
    /// Bulk-move every pending message of the campaign to `FAILED`
    async fn fail_pending(&self, campaign_id: CampaignId) -> Result<u64>;
    async fn status_counts(&self, campaign_id: CampaignId) -> Result<MessageStatusCounts>;
}

/// Database message repository
#[derive(Clone)]
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (
                id, campaign_id, tenant_id, instance_id, recipient, content, sequence, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.campaign_id)
        .bind(input.tenant_id)
        .bind(input.instance_id)
        .bind(&input.recipient)
        .bind(&input.content)
        .bind(input.sequence)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE campaign_id = $1
            ORDER BY sequence ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY sequence ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn mark_sent(
        &self,
        id: MessageId,
        gateway_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'SENT',
                gateway_message_id = COALESCE($2, gateway_message_id),
                sent_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(gateway_message_id)
        .bind(sent_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'FAILED',
                attempts = attempts + 1,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fail_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'FAILED', updated_at = NOW()
            WHERE campaign_id = $1 AND status = 'pending'
            "#,
        )
        .bind(campaign_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<MessageStatusCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM messages WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let mut counts = MessageStatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "pending" => counts.pending = count,
                "SENT" => counts.sent = count,
                "FAILED" => counts.failed = count,
                _ => {}
            }
        }

        Ok(counts)
    }
}
