//! Dispatch progress events
//!
//! Broadcast to any number of observers. Publishing never blocks and never
//! fails; events sent while nobody listens are dropped.

use pulsecast_common::types::{CampaignId, CampaignStatus, MessageId, TenantId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Why a campaign changed status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Created and submitted immediately
    Started,
    /// Scheduled start time reached
    Promoted,
    Paused,
    Resumed,
    /// Stopped by the user
    Stopped,
    /// Every contact has an outcome, or nothing was left to send
    Completed,
    /// End time reached with work outstanding
    Expired,
    /// Creation failed after the campaign row was written
    SetupFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    MessageSent {
        tenant_id: TenantId,
        campaign_id: CampaignId,
        message_id: MessageId,
    },
    MessageFailed {
        tenant_id: TenantId,
        campaign_id: CampaignId,
        message_id: MessageId,
        error: String,
        /// No retries remain
        final_attempt: bool,
    },
    CampaignStatusChanged {
        tenant_id: TenantId,
        campaign_id: CampaignId,
        status: CampaignStatus,
        reason: TransitionReason,
    },
}

impl DispatchEvent {
    pub fn campaign_id(&self) -> CampaignId {
        match self {
            DispatchEvent::MessageSent { campaign_id, .. }
            | DispatchEvent::MessageFailed { campaign_id, .. }
            | DispatchEvent::CampaignStatusChanged { campaign_id, .. } => *campaign_id,
        }
    }
}

/// Fan-out channel for [`DispatchEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DispatchEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
