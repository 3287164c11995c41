//! In-memory repository implementation
//!
//! Implements every repository trait over `HashMap`s behind a single
//! `RwLock`, so each operation observes and mutates a consistent snapshot.
//! Primarily intended for tests; nothing here survives a restart.

use crate::models::{
    Campaign, CampaignInstance, CreateCampaign, CreateInstance, CreateLink, CreateMessage,
    Instance, Link, Message, MessageStatusCounts, MessageTemplate,
};
use crate::repository::{CampaignRepository, InstanceRepository, LinkRepository, MessageRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsecast_common::types::{
    CampaignId, CampaignStatus, InstanceId, LinkId, MessageId, MessageStatus, TenantId,
};
use pulsecast_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<InstanceId, Instance>,
    campaigns: HashMap<CampaignId, Campaign>,
    campaign_instances: Vec<CampaignInstance>,
    message_templates: Vec<MessageTemplate>,
    messages: HashMap<MessageId, Message>,
    links: HashMap<LinkId, Link>,
}

/// In-memory store shared by clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of message rows across all campaigns
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }

    /// All messages of a campaign in contact-list order
    pub async fn messages_of(&self, campaign_id: CampaignId) -> Vec<Message> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.campaign_id == campaign_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sequence);
        messages
    }

    /// Overwrite a campaign row, for arranging test fixtures
    pub async fn put_campaign(&self, campaign: Campaign) {
        self.tables
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign);
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            name: input.name,
            message: input.message,
            status: input.status.as_str().to_string(),
            total_contacts: input.total_contacts,
            sent_count: 0,
            failed_count: 0,
            delay_min: input.delay_min,
            delay_max: input.delay_max,
            instance_switch_count: input.instance_switch_count,
            message_rotation_count: input.message_rotation_count,
            scheduled_at: input.scheduled_at,
            end_at: input.end_at,
            media_url: input.media_url,
            media_type: input.media_type,
            created_at: now,
            updated_at: now,
            started_at: (input.status == CampaignStatus::Processing).then_some(now),
            ended_at: None,
        };

        self.tables
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.tables.read().await.campaigns.get(&id).cloned())
    }

    async fn get_by_tenant(&self, tenant_id: TenantId, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self
            .tables
            .read()
            .await
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut campaigns: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| status.map_or(true, |s| c.is(s)))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut campaigns: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| c.status_enum().is_some_and(|s| s.is_active()))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn add_instances(
        &self,
        campaign_id: CampaignId,
        instance_ids: &[InstanceId],
    ) -> Result<Vec<CampaignInstance>> {
        let rows: Vec<CampaignInstance> = instance_ids
            .iter()
            .enumerate()
            .map(|(index, instance_id)| CampaignInstance {
                id: Uuid::now_v7(),
                campaign_id,
                instance_id: *instance_id,
                order_index: index as i32,
            })
            .collect();

        self.tables
            .write()
            .await
            .campaign_instances
            .extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn add_templates(
        &self,
        campaign_id: CampaignId,
        templates: &[String],
    ) -> Result<Vec<MessageTemplate>> {
        let rows: Vec<MessageTemplate> = templates
            .iter()
            .enumerate()
            .map(|(index, content)| MessageTemplate {
                id: Uuid::now_v7(),
                campaign_id,
                content: content.clone(),
                order_index: index as i32,
            })
            .collect();

        self.tables
            .write()
            .await
            .message_templates
            .extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn list_instances(&self, campaign_id: CampaignId) -> Result<Vec<CampaignInstance>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<CampaignInstance> = tables
            .campaign_instances
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.order_index);
        Ok(rows)
    }

    async fn list_templates(&self, campaign_id: CampaignId) -> Result<Vec<MessageTemplate>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<MessageTemplate> = tables
            .message_templates
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.order_index);
        Ok(rows)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut tables = self.tables.write().await;
        let Some(campaign) = tables.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !campaign.status_enum().is_some_and(|s| from.contains(&s)) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = to.as_str().to_string();
        campaign.updated_at = now;
        if to == CampaignStatus::Processing && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to.is_terminal() {
            campaign.ended_at = Some(now);
        }
        Ok(Some(campaign.clone()))
    }

    async fn increment_sent(&self, id: CampaignId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.campaigns.get_mut(&id) {
            Some(c) if c.processed_count() < c.total_contacts => {
                c.sent_count += 1;
                c.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_failed(&self, id: CampaignId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.campaigns.get_mut(&id) {
            Some(c) if c.processed_count() < c.total_contacts => {
                c.failed_count += 1;
                c.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_if_done(&self, id: CampaignId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.campaigns.get_mut(&id) {
            Some(c) if c.is(CampaignStatus::Processing) && c.is_exhausted() => {
                let now = Utc::now();
                c.status = CampaignStatus::Completed.as_str().to_string();
                c.ended_at = Some(now);
                c.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut due: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.is(CampaignStatus::Scheduled))
            .filter(|c| c.scheduled_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        Ok(due)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.is(CampaignStatus::Processing))
            .filter(|c| c.end_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        expired.sort_by_key(|c| c.end_at);
        Ok(expired)
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.messages.retain(|_, m| m.campaign_id != id);
        tables.message_templates.retain(|t| t.campaign_id != id);
        tables.campaign_instances.retain(|i| i.campaign_id != id);
        Ok(tables.campaigns.remove(&id).is_some())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: Uuid::now_v7(),
            campaign_id: input.campaign_id,
            tenant_id: input.tenant_id,
            instance_id: input.instance_id,
            recipient: input.recipient,
            content: input.content,
            sequence: input.sequence,
            status: MessageStatus::Pending.as_str().to_string(),
            attempts: 0,
            last_error: None,
            gateway_message_id: None,
            sent_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        self.tables
            .write()
            .await
            .messages
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        Ok(self
            .messages_of(campaign_id)
            .await
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Message>> {
        Ok(self
            .messages_of(campaign_id)
            .await
            .into_iter()
            .filter(Message::is_pending)
            .collect())
    }

    async fn mark_sent(
        &self,
        id: MessageId,
        gateway_message_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;
        message.status = MessageStatus::Sent.as_str().to_string();
        if let Some(gateway_id) = gateway_message_id {
            message.gateway_message_id = Some(gateway_id.to_string());
        }
        message.sent_at = Some(sent_at);
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId, error: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;
        message.status = MessageStatus::Failed.as_str().to_string();
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut affected = 0;
        for message in tables
            .messages
            .values_mut()
            .filter(|m| m.campaign_id == campaign_id && m.is_pending())
        {
            message.status = MessageStatus::Failed.as_str().to_string();
            message.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<MessageStatusCounts> {
        let tables = self.tables.read().await;
        let mut counts = MessageStatusCounts::default();
        for message in tables.messages.values().filter(|m| m.campaign_id == campaign_id) {
            match message.status_enum() {
                Some(MessageStatus::Pending) => counts.pending += 1,
                Some(MessageStatus::Sent) => counts.sent += 1,
                Some(MessageStatus::Failed) => counts.failed += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl InstanceRepository for MemoryStore {
    async fn create(&self, input: CreateInstance) -> Result<Instance> {
        let now = Utc::now();
        let instance = Instance {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            instance_name: input.instance_name,
            status: input.status.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };

        self.tables
            .write()
            .await
            .instances
            .insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get(&self, id: InstanceId) -> Result<Option<Instance>> {
        Ok(self.tables.read().await.instances.get(&id).cloned())
    }

    async fn list_connected(&self, tenant_id: TenantId, ids: &[InstanceId]) -> Result<Vec<Instance>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.instances.get(id))
            .filter(|i| i.tenant_id == tenant_id && i.is_connected())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn create(&self, input: CreateLink) -> Result<Link> {
        let mut tables = self.tables.write().await;
        if tables.links.values().any(|l| l.short_code == input.short_code) {
            return Err(Error::Conflict(format!(
                "short code {} already exists",
                input.short_code
            )));
        }

        let link = Link {
            id: Uuid::now_v7(),
            original_url: input.original_url,
            short_code: input.short_code,
            campaign_id: input.campaign_id,
            message_id: input.message_id,
            clicks: 0,
            created_at: Utc::now(),
        };
        tables.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        Ok(self
            .tables
            .read()
            .await
            .links
            .values()
            .find(|l| l.short_code == short_code)
            .cloned())
    }

    async fn increment_clicks(&self, id: LinkId) -> Result<()> {
        if let Some(link) = self.tables.write().await.links.get_mut(&id) {
            link.clicks += 1;
        }
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Link>> {
        let tables = self.tables.read().await;
        let mut links: Vec<Link> = tables
            .links
            .values()
            .filter(|l| l.campaign_id == Some(campaign_id))
            .cloned()
            .collect();
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }
}
