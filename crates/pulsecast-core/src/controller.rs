//! Campaign state controller
//!
//! ```text
//! SCHEDULED -> PROCESSING -> COMPLETED | FAILED
//!              PROCESSING <-> PAUSED
//! ```
//!
//! Every transition is a conditional update on the current status, so a call
//! from the wrong state fails with [`CampaignError::InvalidState`] and
//! changes nothing. Queue cleanup happens after the status is committed; a
//! job that is already being sent is not interrupted.

use crate::engine::Engine;
use crate::enqueuer::submit_pending;
use crate::error::{CampaignError, CampaignResult};
use crate::events::TransitionReason;
use crate::queue::cancel_campaign_jobs;
use pulsecast_common::types::{CampaignId, CampaignStatus, TenantId};
use pulsecast_common::Error;
use pulsecast_storage::models::{
    Campaign, CampaignInstance, Message, MessageStatusCounts, MessageTemplate,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// A campaign with its message breakdown
#[derive(Debug, Clone, Serialize)]
pub struct CampaignDetails {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub breakdown: MessageStatusCounts,
    pub progress: f64,
    /// Instance rotation order
    pub instances: Vec<CampaignInstance>,
    /// Template rotation order
    pub templates: Vec<MessageTemplate>,
}

pub struct CampaignController {
    engine: Engine,
}

fn status_of(campaign: &Campaign) -> CampaignResult<CampaignStatus> {
    campaign.status_enum().ok_or_else(|| {
        CampaignError::Store(Error::Internal(format!(
            "campaign {} has unknown status {}",
            campaign.id, campaign.status
        )))
    })
}

impl CampaignController {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    async fn load(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<Campaign> {
        self.engine
            .repos
            .campaigns
            .get_by_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Apply `from -> to`, or report the status that blocked it
    async fn transition(
        &self,
        campaign: &Campaign,
        action: &'static str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> CampaignResult<Campaign> {
        let status = status_of(campaign)?;
        if !from.contains(&status) {
            return Err(CampaignError::InvalidState { action, status });
        }

        match self
            .engine
            .repos
            .campaigns
            .transition(campaign.id, from, to)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                // Lost a race; report what is there now
                let current = self
                    .engine
                    .repos
                    .campaigns
                    .get(campaign.id)
                    .await?
                    .ok_or(CampaignError::NotFound)?;
                Err(CampaignError::InvalidState {
                    action,
                    status: status_of(&current)?,
                })
            }
        }
    }

    /// Freeze a running campaign; pending messages stay pending
    pub async fn pause(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.load(tenant_id, id).await?;
        let paused = self
            .transition(
                &campaign,
                "pause",
                &[CampaignStatus::Processing],
                CampaignStatus::Paused,
            )
            .await?;

        let removed = self.withdraw_jobs(id).await?;
        debug!(campaign_id = %id, removed, "Removed queued jobs on pause");

        self.engine.announce(&paused, TransitionReason::Paused);
        Ok(paused)
    }

    /// Remove a campaign's queued jobs so its pending messages can be
    /// submitted again later
    ///
    /// A job awaiting retry belongs to a message already marked `FAILED`.
    /// Only pending messages are ever resubmitted, so its outcome is final
    /// here and it is counted as failed.
    async fn withdraw_jobs(&self, id: CampaignId) -> CampaignResult<usize> {
        let removed = cancel_campaign_jobs(self.engine.queue.as_ref(), id).await?;
        let retrying = removed.iter().filter(|j| j.attempts_made > 0).count();
        for _ in 0..retrying {
            self.engine.repos.campaigns.increment_failed(id).await?;
        }
        Ok(removed.len())
    }

    /// Undo a start whose submission failed partway
    ///
    /// Withdraws whatever was submitted and moves the campaign from
    /// `PROCESSING` back to `to`, where the start can be retried.
    async fn roll_back_start(
        &self,
        id: CampaignId,
        to: CampaignStatus,
    ) -> CampaignResult<()> {
        let removed = self.withdraw_jobs(id).await?;
        let restored = self
            .engine
            .repos
            .campaigns
            .transition(id, &[CampaignStatus::Processing], to)
            .await?;
        warn!(
            campaign_id = %id,
            removed,
            restored = restored.is_some(),
            "Rolled campaign back to {} after failed submission",
            to
        );
        Ok(())
    }

    /// Run a submission for a campaign just moved to `PROCESSING`, rolling
    /// back to `fallback` if it fails
    pub(crate) async fn submit_or_roll_back(
        &self,
        campaign: &Campaign,
        pending: &[Message],
        fallback: CampaignStatus,
    ) -> CampaignResult<usize> {
        match submit_pending(&self.engine, campaign, pending).await {
            Ok(submitted) => Ok(submitted),
            Err(e) => {
                error!(campaign_id = %campaign.id, "Failed to submit campaign messages: {}", e);
                if let Err(rollback) = self.roll_back_start(campaign.id, fallback).await {
                    error!(campaign_id = %campaign.id, "Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Re-submit every pending message with a fresh schedule
    pub async fn resume(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.load(tenant_id, id).await?;
        let status = status_of(&campaign)?;
        if status != CampaignStatus::Paused {
            return Err(CampaignError::InvalidState {
                action: "resume",
                status,
            });
        }

        let pending = self.engine.repos.messages.list_pending(id).await?;
        if pending.is_empty() {
            let completed = self
                .transition(
                    &campaign,
                    "resume",
                    &[CampaignStatus::Paused],
                    CampaignStatus::Completed,
                )
                .await?;
            self.engine.announce(&completed, TransitionReason::Completed);
            return Ok(completed);
        }

        let resumed = self
            .transition(
                &campaign,
                "resume",
                &[CampaignStatus::Paused],
                CampaignStatus::Processing,
            )
            .await?;
        let submitted = self
            .submit_or_roll_back(&resumed, &pending, CampaignStatus::Paused)
            .await?;
        info!(campaign_id = %id, submitted, "Campaign resumed");

        self.engine.announce(&resumed, TransitionReason::Resumed);
        self.check_completion(id).await?;
        Ok(resumed)
    }

    /// Terminate a running or paused campaign; unsent messages become `FAILED`
    pub async fn stop(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.load(tenant_id, id).await?;
        let stopped = self
            .transition(
                &campaign,
                "stop",
                &[CampaignStatus::Processing, CampaignStatus::Paused],
                CampaignStatus::Failed,
            )
            .await?;

        let removed = cancel_campaign_jobs(self.engine.queue.as_ref(), id)
            .await?
            .len();
        let failed = self.engine.repos.messages.fail_pending(id).await?;
        info!(campaign_id = %id, removed, failed, "Campaign stopped");

        self.engine.announce(&stopped, TransitionReason::Stopped);
        Ok(stopped)
    }

    /// Delete a campaign in any state along with its messages
    pub async fn delete(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<()> {
        let campaign = self.load(tenant_id, id).await?;
        if matches!(
            status_of(&campaign)?,
            CampaignStatus::Processing | CampaignStatus::Paused
        ) {
            let removed = cancel_campaign_jobs(self.engine.queue.as_ref(), id).await?;
            debug!(
                campaign_id = %id,
                removed = removed.len(),
                "Removed queued jobs before delete"
            );
        }

        if !self.engine.repos.campaigns.delete(id).await? {
            return Err(CampaignError::NotFound);
        }
        info!(campaign_id = %id, "Campaign \"{}\" deleted", campaign.name);
        Ok(())
    }

    /// Complete a `PROCESSING` campaign whose counters reached its total
    ///
    /// Safe to call repeatedly; returns whether this call completed it.
    pub async fn check_completion(&self, id: CampaignId) -> CampaignResult<bool> {
        if !self.engine.repos.campaigns.complete_if_done(id).await? {
            return Ok(false);
        }
        if let Some(campaign) = self.engine.repos.campaigns.get(id).await? {
            self.engine.announce(&campaign, TransitionReason::Completed);
        }
        Ok(true)
    }

    pub async fn get(&self, tenant_id: TenantId, id: CampaignId) -> CampaignResult<CampaignDetails> {
        let campaign = self.load(tenant_id, id).await?;
        let repos = &self.engine.repos;
        let breakdown = repos.messages.status_counts(id).await?;
        let instances = repos.campaigns.list_instances(id).await?;
        let templates = repos.campaigns.list_templates(id).await?;
        let progress = campaign.progress_percentage();
        Ok(CampaignDetails {
            campaign,
            breakdown,
            progress,
            instances,
            templates,
        })
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> CampaignResult<Vec<Campaign>> {
        Ok(self
            .engine
            .repos
            .campaigns
            .list_by_tenant(tenant_id, status, limit.clamp(1, 200), offset.max(0))
            .await?)
    }

    /// Scheduled, running and paused campaigns
    pub async fn active(&self, tenant_id: TenantId) -> CampaignResult<Vec<Campaign>> {
        Ok(self.engine.repos.campaigns.list_active(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::events::DispatchEvent;
    use crate::testing::{Harness, ScriptedGateway};
    use pretty_assertions::assert_eq;
    use pulsecast_common::types::InstanceStatus;
    use pulsecast_storage::repository::MessageRepository;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn running_campaign(h: &Harness, contacts: usize) -> Campaign {
        let a = h.instance("sales-a", InstanceStatus::Connected).await;
        h.engine
            .enqueuer()
            .create(h.new_campaign(vec![a.id], contacts))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pause_cancels_jobs_and_keeps_messages_pending() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 4).await;
        let controller = h.engine.controller();

        let paused = controller.pause(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(paused.status, "PAUSED");
        assert!(h.queue.pending_for(campaign.id).await.is_empty());

        let messages = h.store.messages_of(campaign.id).await;
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| m.is_pending()));
    }

    #[tokio::test]
    async fn test_resume_resubmits_every_pending_message() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 4).await;
        let controller = h.engine.controller();

        // One message goes out before the pause
        h.worker_step().await;
        controller.pause(h.tenant_id, campaign.id).await.unwrap();

        h.clock.advance(chrono::Duration::hours(1));
        let resumed = controller.resume(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(resumed.status, "PROCESSING");

        let jobs = h.queue.pending_for(campaign.id).await;
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].due_at, h.clock.now());
        let pending_ids: Vec<Uuid> = h
            .store
            .messages_of(campaign.id)
            .await
            .into_iter()
            .filter(|m| m.is_pending())
            .map(|m| m.id)
            .collect();
        let job_ids: Vec<Uuid> = jobs.iter().map(|j| j.payload.message_id).collect();
        assert_eq!(job_ids, pending_ids);
    }

    #[tokio::test]
    async fn test_pause_settles_messages_waiting_on_retry() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.fail_times("5500000000000", 1).await;
        let h = Harness::with_gateway(gateway).await;
        let campaign = running_campaign(&h, 2).await;
        let controller = h.engine.controller();

        h.worker_step().await;
        controller.pause(h.tenant_id, campaign.id).await.unwrap();
        let paused = h.engine.repos.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(paused.failed_count, 1);

        controller.resume(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(h.queue.pending_for(campaign.id).await.len(), 1);
        h.drain().await;

        let done = h.engine.repos.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(done.status, "COMPLETED");
        assert_eq!((done.sent_count, done.failed_count), (1, 1));
    }

    #[tokio::test]
    async fn test_failed_resume_returns_to_paused() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;
        let campaign = h
            .engine
            .enqueuer()
            .create(h.new_campaign(vec![a.id], 3))
            .await
            .unwrap();
        h.engine.controller().pause(h.tenant_id, campaign.id).await.unwrap();

        let engine = h.engine_with_queue(Arc::new(h.flaky_queue(1)));
        let err = engine
            .controller()
            .resume(h.tenant_id, campaign.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Store(_)));

        let stored = h.engine.repos.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "PAUSED");
        assert!(h.queue.pending_for(campaign.id).await.is_empty());

        // A later resume picks up every message
        h.engine.controller().resume(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(h.queue.pending_for(campaign.id).await.len(), 3);
        h.drain().await;
        let stored = h.engine.repos.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "COMPLETED");
        assert_eq!(stored.sent_count, 3);
    }

    #[tokio::test]
    async fn test_resume_with_nothing_pending_completes() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 1).await;
        let controller = h.engine.controller();
        controller.pause(h.tenant_id, campaign.id).await.unwrap();
        h.store.fail_pending(campaign.id).await.unwrap();

        let resumed = controller.resume(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(resumed.status, "COMPLETED");
        assert!(h.queue.pending_for(campaign.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_state_is_a_conflict_without_mutation() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 2).await;
        let controller = h.engine.controller();

        let err = controller.resume(h.tenant_id, campaign.id).await.unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InvalidState {
                action: "resume",
                status: CampaignStatus::Processing
            }
        ));
        assert_eq!(err.status_code(), 409);
        assert_eq!(h.queue.pending_for(campaign.id).await.len(), 2);

        controller.stop(h.tenant_id, campaign.id).await.unwrap();
        for result in [
            controller.pause(h.tenant_id, campaign.id).await,
            controller.stop(h.tenant_id, campaign.id).await,
        ] {
            assert!(matches!(
                result.unwrap_err(),
                CampaignError::InvalidState {
                    status: CampaignStatus::Failed,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_stop_is_terminal_and_scoped_to_campaign() {
        let h = Harness::new().await;
        let target = running_campaign(&h, 3).await;
        let other = running_campaign(&h, 2).await;
        let mut events = h.engine.events().subscribe();

        let stopped = h.engine.controller().stop(h.tenant_id, target.id).await.unwrap();
        assert_eq!(stopped.status, "FAILED");
        assert!(stopped.ended_at.is_some());

        assert!(h.queue.pending_for(target.id).await.is_empty());
        assert_eq!(h.queue.pending_for(other.id).await.len(), 2);
        assert!(h
            .store
            .messages_of(target.id)
            .await
            .iter()
            .all(|m| m.status == "FAILED"));

        match events.recv().await.unwrap() {
            DispatchEvent::CampaignStatusChanged { status, reason, .. } => {
                assert_eq!(status, CampaignStatus::Failed);
                assert_eq!(reason, TransitionReason::Stopped);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 3).await;
        let controller = h.engine.controller();

        controller.delete(h.tenant_id, campaign.id).await.unwrap();
        assert!(h.queue.pending_for(campaign.id).await.is_empty());
        assert_eq!(h.store.message_count().await, 0);
        assert!(matches!(
            controller.get(h.tenant_id, campaign.id).await.unwrap_err(),
            CampaignError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_other_tenants_cannot_see_campaign() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 1).await;

        let err = h
            .engine
            .controller()
            .pause(Uuid::new_v4(), campaign.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NotFound));
    }

    #[tokio::test]
    async fn test_details_and_listings() {
        let h = Harness::new().await;
        let campaign = running_campaign(&h, 4).await;
        h.worker_step().await;

        let controller = h.engine.controller();
        let details = controller.get(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(
            details.breakdown,
            MessageStatusCounts {
                pending: 3,
                sent: 1,
                failed: 0
            }
        );
        assert_eq!(details.progress, 25.0);
        assert_eq!(details.instances.len(), 1);
        let templates: Vec<&str> = details.templates.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(templates, vec!["Hi {{name}}"]);

        assert_eq!(controller.active(h.tenant_id).await.unwrap().len(), 1);
        assert_eq!(
            controller
                .list(h.tenant_id, Some(CampaignStatus::Completed), 20, 0)
                .await
                .unwrap()
                .len(),
            0
        );
    }
}
