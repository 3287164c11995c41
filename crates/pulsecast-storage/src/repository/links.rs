//! Tracked link repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateLink, Link};
use async_trait::async_trait;
use pulsecast_common::types::{CampaignId, LinkId};
use pulsecast_common::Result;
use uuid::Uuid;

/// Link repository trait
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn create(&self, input: CreateLink) -> Result<Link>;
    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>>;
    async fn increment_clicks(&self, id: LinkId) -> Result<()>;
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Link>>;
}

/// Database link repository
#[derive(Clone)]
pub struct DbLinkRepository {
    pool: DatabasePool,
}

impl DbLinkRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkRepository for DbLinkRepository {
    async fn create(&self, input: CreateLink) -> Result<Link> {
        sqlx::query_as::<_, Link>(
            r#"
            INSERT INTO links (id, original_url, short_code, campaign_id, message_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.original_url)
        .bind(&input.short_code)
        .bind(input.campaign_id)
        .bind(input.message_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        sqlx::query_as::<_, Link>("SELECT * FROM links WHERE short_code = $1")
            .bind(short_code)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn increment_clicks(&self, id: LinkId) -> Result<()> {
        sqlx::query("UPDATE links SET clicks = clicks + 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Link>> {
        sqlx::query_as::<_, Link>(
            "SELECT * FROM links WHERE campaign_id = $1 ORDER BY created_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
