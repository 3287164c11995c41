//! Campaign repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Campaign, CampaignInstance, CreateCampaign, MessageTemplate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecast_common::types::{CampaignId, CampaignStatus, InstanceId, TenantId};
use pulsecast_common::Result;
use uuid::Uuid;

/// Campaign repository trait
///
/// Counter increments and status transitions are single conditional statements
/// so concurrent writers never lose updates and never apply a transition from
/// an unexpected source state.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_by_tenant(&self, tenant_id: TenantId, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;
    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Campaign>>;

    /// Store the rotation order of instances, index-stable
    async fn add_instances(
        &self,
        campaign_id: CampaignId,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<CampaignInstance>>;
    /// Store the rotation order of templates, index-stable
    async fn add_templates(
        &self,
        campaign_id: CampaignId,
        templates: &[String],
    ) -> Result<Vec<MessageTemplate>>;
    async fn list_instances(&self, campaign_id: CampaignId) -> Result<Vec<CampaignInstance>>;
    async fn list_templates(&self, campaign_id: CampaignId) -> Result<Vec<MessageTemplate>>;

    /// Move to `to` only if the current status is one of `from`.
    /// Returns `None` when the campaign is missing or in another state.
    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;

    /// Atomically add one to `sent_count` while the counters stay within
    /// `total_contacts`. Returns whether the increment was applied.
    async fn increment_sent(&self, id: CampaignId) -> Result<bool>;
    /// Atomically add one to `failed_count`, same bound as `increment_sent`.
    async fn increment_failed(&self, id: CampaignId) -> Result<bool>;

    /// Mark a `PROCESSING` campaign `COMPLETED` once its counters reach the
    /// contact total. Idempotent; returns whether this call transitioned it.
    async fn complete_if_done(&self, id: CampaignId) -> Result<bool>;

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;

    /// Delete the campaign with its messages, templates and instance links
    async fn delete(&self, id: CampaignId) -> Result<bool>;
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn status_list(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, message, status, total_contacts,
                delay_min, delay_max, instance_switch_count, message_rotation_count,
                scheduled_at, end_at, media_url, media_type,
                started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    CASE WHEN $5 = 'PROCESSING' THEN NOW() ELSE NULL END)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.message)
        .bind(input.status.as_str())
        .bind(input.total_contacts)
        .bind(input.delay_min)
        .bind(input.delay_max)
        .bind(input.instance_switch_count)
        .bind(input.message_rotation_count)
        .bind(input.scheduled_at)
        .bind(input.end_at)
        .bind(&input.media_url)
        .bind(&input.media_type)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn get_by_tenant(&self, tenant_id: TenantId, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE tenant_id = $1 AND status IN ('SCHEDULED', 'PROCESSING', 'PAUSED')
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn add_instances(
        &self,
        campaign_id: CampaignId,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<CampaignInstance>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;
        let mut rows = Vec::with_capacity(instance_ids.len());

        for (index, instance_id) in instance_ids.iter().enumerate() {
            let row = sqlx::query_as::<_, CampaignInstance>(
                r#"
                INSERT INTO campaign_instances (id, campaign_id, instance_id, order_index)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign_id)
            .bind(instance_id)
            .bind(index as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            rows.push(row);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(rows)
    }

    async fn add_templates(
        &self,
        campaign_id: CampaignId,
        templates: &[String],
    ) -> Result<Vec<MessageTemplate>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;
        let mut rows = Vec::with_capacity(templates.len());

        for (index, content) in templates.iter().enumerate() {
            let row = sqlx::query_as::<_, MessageTemplate>(
                r#"
                INSERT INTO message_templates (id, campaign_id, content, order_index)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign_id)
            .bind(content)
            .bind(index as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            rows.push(row);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(rows)
    }

    async fn list_instances(&self, campaign_id: CampaignId) -> Result<Vec<CampaignInstance>> {
        sqlx::query_as::<_, CampaignInstance>(
            "SELECT * FROM campaign_instances WHERE campaign_id = $1 ORDER BY order_index ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_templates(&self, campaign_id: CampaignId) -> Result<Vec<MessageTemplate>> {
        sqlx::query_as::<_, MessageTemplate>(
            "SELECT * FROM message_templates WHERE campaign_id = $1 ORDER BY order_index ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $3,
                started_at = CASE WHEN $3 = 'PROCESSING' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                ended_at = CASE WHEN $3 IN ('COMPLETED', 'FAILED') THEN NOW() ELSE ended_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_list(from))
        .bind(to.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn increment_sent(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET sent_count = sent_count + 1, updated_at = NOW()
            WHERE id = $1 AND sent_count + failed_count < total_contacts
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_failed(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET failed_count = failed_count + 1, updated_at = NOW()
            WHERE id = $1 AND sent_count + failed_count < total_contacts
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_if_done(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET status = 'COMPLETED', ended_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND status = 'PROCESSING'
              AND sent_count + failed_count >= total_contacts
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'SCHEDULED'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'PROCESSING'
              AND end_at IS NOT NULL
              AND end_at <= $1
            ORDER BY end_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        for table in ["messages", "message_templates", "campaign_instances"] {
            sqlx::query(&format!("DELETE FROM {} WHERE campaign_id = $1", table))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
