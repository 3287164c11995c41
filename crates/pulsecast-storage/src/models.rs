//! Database models

use chrono::{DateTime, Utc};
use pulsecast_common::types::{
    CampaignId, CampaignStatus, InstanceId, InstanceStatus, LinkId, MessageId, MessageStatus,
    TenantId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Gateway instance model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub instance_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Get status enum
    pub fn status_enum(&self) -> Option<InstanceStatus> {
        self.status.parse().ok()
    }

    /// Whether the instance may take part in rotation
    pub fn is_connected(&self) -> bool {
        self.status_enum() == Some(InstanceStatus::Connected)
    }
}

/// Create instance input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstance {
    pub tenant_id: TenantId,
    pub instance_name: String,
    pub status: InstanceStatus,
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Primary message text, display only
    pub message: String,
    pub status: String,
    pub total_contacts: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    /// Seconds
    pub delay_min: i32,
    /// Seconds
    pub delay_max: i32,
    pub instance_switch_count: i32,
    pub message_rotation_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Whether the campaign is in the given status
    pub fn is(&self, status: CampaignStatus) -> bool {
        self.status_enum() == Some(status)
    }

    /// Messages with a terminal outcome
    pub fn processed_count(&self) -> i32 {
        self.sent_count + self.failed_count
    }

    /// Whether every contact has a terminal outcome
    pub fn is_exhausted(&self) -> bool {
        self.processed_count() >= self.total_contacts
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_contacts == 0 {
            0.0
        } else {
            (self.processed_count() as f64 / self.total_contacts as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub message: String,
    pub status: CampaignStatus,
    pub total_contacts: i32,
    pub delay_min: i32,
    pub delay_max: i32,
    pub instance_switch_count: i32,
    pub message_rotation_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

/// Ordered association between a campaign and a gateway instance
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignInstance {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub instance_id: InstanceId,
    pub order_index: i32,
}

/// Ordered association between a campaign and a template string
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub content: String,
    pub order_index: i32,
}

/// Per-recipient message model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub recipient: String,
    /// Final, post-transformation text
    pub content: String,
    /// Position in the campaign's contact list
    pub sequence: i32,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub gateway_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Get status enum
    pub fn status_enum(&self) -> Option<MessageStatus> {
        self.status.parse().ok()
    }

    pub fn is_pending(&self) -> bool {
        self.status_enum() == Some(MessageStatus::Pending)
    }
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub recipient: String,
    pub content: String,
    pub sequence: i32,
}

/// Message status breakdown for a campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

impl MessageStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.failed
    }
}

/// Tracked short link model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub original_url: String,
    pub short_code: String,
    pub campaign_id: Option<CampaignId>,
    pub message_id: Option<MessageId>,
    pub clicks: i32,
    pub created_at: DateTime<Utc>,
}

/// Create link input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLink {
    pub original_url: String,
    pub short_code: String,
    pub campaign_id: Option<CampaignId>,
    pub message_id: Option<MessageId>,
}
