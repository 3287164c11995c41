//! Tracked short links

use async_trait::async_trait;
use pulsecast_common::config::LinksConfig;
use pulsecast_common::types::{CampaignId, MessageId};
use pulsecast_common::{Error, Result};
use pulsecast_storage::models::{CreateLink, Link};
use pulsecast_storage::repository::LinkRepository;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

/// Link shortening capability used by the content transformer
#[async_trait]
pub trait LinkShortener: Send + Sync {
    /// Replace `url` with a tracked short URL
    async fn shorten(
        &self,
        url: &str,
        campaign_id: CampaignId,
        message_id: Option<MessageId>,
    ) -> Result<String>;
}

/// Shortener persisting every link so clicks can be counted
pub struct TrackedLinkShortener {
    links: Arc<dyn LinkRepository>,
    base_url: String,
    code_length: usize,
}

impl TrackedLinkShortener {
    pub fn new(links: Arc<dyn LinkRepository>, config: &LinksConfig) -> Self {
        Self {
            links,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            code_length: config.code_length.max(4),
        }
    }

    fn generate_code(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.code_length)
            .map(char::from)
            .collect()
    }

    /// Look up a short code and count the click
    pub async fn resolve(&self, code: &str) -> Result<Option<Link>> {
        let Some(link) = self.links.find_by_code(code).await? else {
            return Ok(None);
        };
        self.links.increment_clicks(link.id).await?;
        debug!(code = %code, clicks = link.clicks + 1, "Short link resolved");
        Ok(Some(link))
    }
}

#[async_trait]
impl LinkShortener for TrackedLinkShortener {
    async fn shorten(
        &self,
        url: &str,
        campaign_id: CampaignId,
        message_id: Option<MessageId>,
    ) -> Result<String> {
        // Retry on the rare code collision
        let mut last_err = None;
        for _ in 0..3 {
            let input = CreateLink {
                original_url: url.to_string(),
                short_code: self.generate_code(),
                campaign_id: Some(campaign_id),
                message_id,
            };
            match self.links.create(input).await {
                Ok(link) => return Ok(format!("{}/l/{}", self.base_url, link.short_code)),
                Err(Error::Conflict(msg)) => last_err = Some(Error::Conflict(msg)),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Internal("short code generation failed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pulsecast_storage::MemoryStore;
    use uuid::Uuid;

    fn shortener(store: &MemoryStore) -> TrackedLinkShortener {
        TrackedLinkShortener::new(
            Arc::new(store.clone()),
            &LinksConfig {
                base_url: "https://go.example.com/".to_string(),
                code_length: 8,
            },
        )
    }

    #[tokio::test]
    async fn test_shorten_persists_link() {
        let store = MemoryStore::new();
        let shortener = shortener(&store);
        let campaign_id = Uuid::new_v4();

        let short = shortener
            .shorten("https://shop.example.com/sale", campaign_id, None)
            .await
            .unwrap();

        let code = short.strip_prefix("https://go.example.com/l/").unwrap();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));

        let links = store.list_by_campaign(campaign_id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].original_url, "https://shop.example.com/sale");
        assert_eq!(links[0].message_id, None);
    }

    #[tokio::test]
    async fn test_resolve_counts_clicks() {
        let store = MemoryStore::new();
        let shortener = shortener(&store);
        let campaign_id = Uuid::new_v4();
        let short = shortener
            .shorten("https://shop.example.com", campaign_id, None)
            .await
            .unwrap();
        let code = short.rsplit('/').next().unwrap();

        let link = shortener.resolve(code).await.unwrap().unwrap();
        assert_eq!(link.original_url, "https://shop.example.com");
        shortener.resolve(code).await.unwrap();

        let stored = store.find_by_code(code).await.unwrap().unwrap();
        assert_eq!(stored.clicks, 2);
        assert!(shortener.resolve("missing").await.unwrap().is_none());
    }
}
