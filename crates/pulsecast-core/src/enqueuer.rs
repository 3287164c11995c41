//! Campaign creation and job submission
//!
//! Creating a campaign fixes each recipient's instance, template and final
//! text up front by writing one pending message row per contact. Immediate
//! campaigns are submitted to the queue right away; scheduled ones wait for
//! the scheduler to call [`submit_pending`] at their start time.

use crate::engine::Engine;
use crate::error::{CampaignError, CampaignResult};
use crate::events::TransitionReason;
use crate::pacing::{cumulative_delays, DelayRange};
use crate::queue::{cancel_campaign_jobs, JobPayload};
use crate::rotation::Rotator;
use chrono::{DateTime, Utc};
use pulsecast_common::types::{CampaignStatus, Contact, InstanceId, MediaRef, TenantId};
use pulsecast_storage::models::{Campaign, CreateCampaign, CreateMessage, Instance, Message};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Validated input for a new campaign
#[derive(Debug, Clone, Default)]
pub struct NewCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    /// Primary text shown in listings
    pub message: String,
    /// Rotation order of templates; blank entries are ignored
    pub templates: Vec<String>,
    /// Rotation order of instances; disconnected ones are dropped
    pub instance_ids: Vec<InstanceId>,
    pub contacts: Vec<Contact>,
    pub delay_min_secs: Option<u32>,
    pub delay_max_secs: Option<u32>,
    pub instance_switch_count: Option<u32>,
    pub message_rotation_count: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub media: Option<MediaRef>,
}

/// Entry point for campaign creation
pub struct CampaignEnqueuer {
    engine: Engine,
}

impl CampaignEnqueuer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Validate, persist and (unless scheduled for later) submit a campaign
    ///
    /// Validation failures have no side effects.
    pub async fn create(&self, input: NewCampaign) -> CampaignResult<Campaign> {
        if input.contacts.is_empty() {
            return Err(CampaignError::NoContacts);
        }

        let templates: Vec<String> = input
            .templates
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();
        if templates.is_empty() {
            return Err(CampaignError::NoTemplates);
        }

        let fallback = self.engine.settings.default_delay;
        let range = DelayRange::new(
            input.delay_min_secs.unwrap_or(fallback.min_secs()),
            input.delay_max_secs.unwrap_or(fallback.max_secs()),
        )?;

        let instances = self
            .engine
            .repos
            .instances
            .list_connected(input.tenant_id, &input.instance_ids)
            .await?;
        if instances.is_empty() {
            return Err(CampaignError::NoEligibleInstances);
        }

        let now = self.engine.clock.now();
        let is_scheduled = input.scheduled_at.is_some_and(|at| at > now);
        let status = if is_scheduled {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Processing
        };

        let campaign = self
            .engine
            .repos
            .campaigns
            .create(CreateCampaign {
                tenant_id: input.tenant_id,
                name: input.name.clone(),
                message: input.message.clone(),
                status,
                total_contacts: input.contacts.len() as i32,
                delay_min: range.min_secs() as i32,
                delay_max: range.max_secs() as i32,
                instance_switch_count: input.instance_switch_count.unwrap_or(1).max(1) as i32,
                message_rotation_count: input.message_rotation_count.unwrap_or(1).max(1) as i32,
                scheduled_at: input.scheduled_at,
                end_at: input.end_at,
                media_url: input.media.as_ref().map(|m| m.url.clone()),
                media_type: input.media.as_ref().and_then(|m| m.media_type.clone()),
            })
            .await?;

        info!(
            campaign_id = %campaign.id,
            contacts = input.contacts.len(),
            instances = instances.len(),
            templates = templates.len(),
            scheduled = is_scheduled,
            "Creating campaign \"{}\"",
            campaign.name
        );

        if let Err(e) = self
            .populate(&campaign, &instances, &templates, &input.contacts, is_scheduled)
            .await
        {
            error!(campaign_id = %campaign.id, "Campaign setup failed: {}", e);
            self.abandon(&campaign).await;
            return Err(e);
        }

        let campaign = self
            .engine
            .repos
            .campaigns
            .get(campaign.id)
            .await?
            .ok_or(CampaignError::NotFound)?;
        if !is_scheduled {
            self.engine.announce(&campaign, TransitionReason::Started);
        }
        Ok(campaign)
    }

    /// Fail a campaign whose setup broke partway, withdrawing anything
    /// already submitted so nothing goes out for it
    async fn abandon(&self, campaign: &Campaign) {
        let repos = &self.engine.repos;
        match repos
            .campaigns
            .transition(
                campaign.id,
                &[CampaignStatus::Scheduled, CampaignStatus::Processing],
                CampaignStatus::Failed,
            )
            .await
        {
            Ok(Some(failed)) => self.engine.announce(&failed, TransitionReason::SetupFailed),
            Ok(None) => {}
            Err(e) => error!(campaign_id = %campaign.id, "Failed to mark campaign failed: {}", e),
        }

        match cancel_campaign_jobs(self.engine.queue.as_ref(), campaign.id).await {
            Ok(removed) => debug!(
                campaign_id = %campaign.id,
                removed = removed.len(),
                "Withdrew jobs of failed campaign"
            ),
            Err(e) => error!(campaign_id = %campaign.id, "Failed to withdraw jobs: {}", e),
        }
        if let Err(e) = repos.messages.fail_pending(campaign.id).await {
            error!(campaign_id = %campaign.id, "Failed to fail pending messages: {}", e);
        }
    }

    async fn populate(
        &self,
        campaign: &Campaign,
        instances: &[Instance],
        templates: &[String],
        contacts: &[Contact],
        is_scheduled: bool,
    ) -> CampaignResult<()> {
        let repos = &self.engine.repos;
        let instance_ids: Vec<InstanceId> = instances.iter().map(|i| i.id).collect();
        repos.campaigns.add_instances(campaign.id, &instance_ids).await?;
        repos.campaigns.add_templates(campaign.id, templates).await?;

        let rotator = Rotator::new(campaign.instance_switch_count, campaign.message_rotation_count);
        let mut messages = Vec::with_capacity(contacts.len());
        let mut skipped = 0usize;

        for (i, contact) in contacts.iter().enumerate() {
            let (Some(instance), Some(template)) = (
                rotator.instance_for(i, instances),
                rotator.template_for(i, templates),
            ) else {
                warn!(campaign_id = %campaign.id, index = i, "No instance for recipient, skipping");
                skipped += 1;
                continue;
            };

            let content = self
                .engine
                .transformer
                .render(template, contact, campaign.id)
                .await?;

            let message = repos
                .messages
                .create(CreateMessage {
                    campaign_id: campaign.id,
                    tenant_id: campaign.tenant_id,
                    instance_id: instance.id,
                    recipient: contact.address.clone(),
                    content,
                    sequence: i as i32,
                })
                .await?;
            messages.push(message);
        }

        // Skipped recipients count as failed so the campaign can still finish
        for _ in 0..skipped {
            repos.campaigns.increment_failed(campaign.id).await?;
        }

        if is_scheduled {
            debug!(
                campaign_id = %campaign.id,
                messages = messages.len(),
                "Messages held until scheduled start"
            );
            return Ok(());
        }

        let names: HashMap<InstanceId, String> = instances
            .iter()
            .map(|i| (i.id, i.instance_name.clone()))
            .collect();
        submit_with_names(&self.engine, campaign, &messages, &names).await?;
        Ok(())
    }
}

/// Submit one job per pending message with a fresh cumulative-delay schedule
///
/// Messages must be in contact-list order. The first job is due immediately.
/// A message whose instance no longer exists is failed instead of submitted.
/// Returns the number of jobs submitted.
pub async fn submit_pending(
    engine: &Engine,
    campaign: &Campaign,
    messages: &[Message],
) -> CampaignResult<usize> {
    let mut names = HashMap::new();
    for message in messages {
        if names.contains_key(&message.instance_id) {
            continue;
        }
        if let Some(instance) = engine.repos.instances.get(message.instance_id).await? {
            names.insert(instance.id, instance.instance_name);
        }
    }
    submit_with_names(engine, campaign, messages, &names).await
}

async fn submit_with_names(
    engine: &Engine,
    campaign: &Campaign,
    messages: &[Message],
    names: &HashMap<InstanceId, String>,
) -> CampaignResult<usize> {
    let range = DelayRange::resolve(campaign.delay_min, campaign.delay_max, engine.settings.default_delay);
    let delays = cumulative_delays(messages.len(), range, &mut rand::thread_rng());

    let mut submitted = 0;
    for (message, delay) in messages.iter().zip(delays) {
        let Some(instance_name) = names.get(&message.instance_id) else {
            warn!(
                campaign_id = %campaign.id,
                message_id = %message.id,
                "Instance {} no longer exists, failing message",
                message.instance_id
            );
            engine
                .repos
                .messages
                .mark_failed(message.id, "instance not found")
                .await?;
            engine.repos.campaigns.increment_failed(campaign.id).await?;
            continue;
        };

        let payload = JobPayload {
            instance_name: instance_name.clone(),
            recipient: message.recipient.clone(),
            text: message.content.clone(),
            campaign_id: campaign.id,
            message_id: message.id,
            tenant_id: campaign.tenant_id,
            media_url: campaign.media_url.clone(),
            media_type: campaign.media_type.clone(),
        };
        engine
            .queue
            .enqueue(payload, engine.settings.job_options.with_delay(delay))
            .await?;
        submitted += 1;
    }

    info!(
        campaign_id = %campaign.id,
        submitted,
        "Queued {} messages for campaign \"{}\"",
        submitted,
        campaign.name
    );
    Ok(submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::queue::JobQueue;
    use crate::testing::Harness;
    use pretty_assertions::assert_eq;
    use pulsecast_common::types::InstanceStatus;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_immediate_campaign_rotates_and_queues() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;
        let b = h.instance("sales-b", InstanceStatus::Connected).await;

        let mut input = h.new_campaign(vec![a.id, b.id], 5);
        input.templates = vec!["Hi {{name}}".to_string(), "Hello {{name}}".to_string()];
        input.instance_switch_count = Some(2);
        input.message_rotation_count = Some(1);

        let campaign = h.engine.enqueuer().create(input).await.unwrap();
        assert_eq!(campaign.status, "PROCESSING");
        assert_eq!(campaign.total_contacts, 5);
        assert!(campaign.started_at.is_some());

        let messages = h.store.messages_of(campaign.id).await;
        let instances: Vec<Uuid> = messages.iter().map(|m| m.instance_id).collect();
        assert_eq!(instances, vec![a.id, a.id, b.id, b.id, a.id]);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Hi c0", "Hello c1", "Hi c2", "Hello c3", "Hi c4"]
        );
        assert!(messages.iter().all(|m| m.is_pending()));

        let jobs = h.queue.pending_for(campaign.id).await;
        assert_eq!(jobs.len(), 5);
        assert_eq!(jobs[0].due_at, h.clock.now());
        assert_eq!(jobs[0].payload.instance_name, "sales-a");
        assert_eq!(jobs[2].payload.instance_name, "sales-b");
        for pair in jobs.windows(2) {
            assert!(pair[0].due_at < pair[1].due_at);
        }
    }

    #[tokio::test]
    async fn test_scheduled_campaign_holds_messages() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;

        let mut input = h.new_campaign(vec![a.id], 3);
        input.scheduled_at = Some(h.clock.now() + chrono::Duration::hours(1));

        let campaign = h.engine.enqueuer().create(input).await.unwrap();
        assert_eq!(campaign.status, "SCHEDULED");
        assert_eq!(h.store.messages_of(campaign.id).await.len(), 3);
        assert!(h.queue.pending_for(campaign.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_past_schedule_starts_immediately() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;

        let mut input = h.new_campaign(vec![a.id], 1);
        input.scheduled_at = Some(h.clock.now() - chrono::Duration::minutes(5));

        let campaign = h.engine.enqueuer().create(input).await.unwrap();
        assert_eq!(campaign.status, "PROCESSING");
        assert_eq!(h.queue.pending_for(campaign.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_have_no_side_effects() {
        let h = Harness::new().await;
        let offline = h.instance("sales-off", InstanceStatus::Disconnected).await;
        let online = h.instance("sales-on", InstanceStatus::Connected).await;

        let err = h
            .engine
            .enqueuer()
            .create(h.new_campaign(vec![offline.id], 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NoEligibleInstances));

        let mut input = h.new_campaign(vec![online.id], 2);
        input.templates = vec!["   ".to_string()];
        let err = h.engine.enqueuer().create(input).await.unwrap_err();
        assert!(matches!(err, CampaignError::NoTemplates));

        let err = h
            .engine
            .enqueuer()
            .create(h.new_campaign(vec![online.id], 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NoContacts));

        let mut input = h.new_campaign(vec![online.id], 2);
        input.delay_min_secs = Some(30);
        input.delay_max_secs = Some(10);
        let err = h.engine.enqueuer().create(input).await.unwrap_err();
        assert!(matches!(err, CampaignError::InvalidPacing(_)));

        assert_eq!(h.store.message_count().await, 0);
        assert_eq!(h.queue.stats().await.unwrap(), Default::default());
    }

    #[tokio::test]
    async fn test_links_are_shortened_per_campaign() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;

        let mut input = h.new_campaign(vec![a.id], 2);
        input.templates = vec!["Deals at https://shop.example.com/sale".to_string()];

        let campaign = h.engine.enqueuer().create(input).await.unwrap();
        let messages = h.store.messages_of(campaign.id).await;
        assert!(messages
            .iter()
            .all(|m| m.content.starts_with("Deals at http://localhost:3000/l/")));

        let links = h.engine.repos.links.list_by_campaign(campaign.id).await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.original_url == "https://shop.example.com/sale"));
    }

    #[tokio::test]
    async fn test_setup_failure_withdraws_submitted_jobs() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;
        let engine = h.engine_with_queue(Arc::new(h.flaky_queue(2)));

        let err = engine
            .enqueuer()
            .create(h.new_campaign(vec![a.id], 4))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Store(_)));

        let campaigns = h.engine.controller().list(h.tenant_id, None, 10, 0).await.unwrap();
        assert_eq!(campaigns.len(), 1);
        let campaign = &campaigns[0];
        assert_eq!(campaign.status, "FAILED");
        assert!(h.queue.pending_for(campaign.id).await.is_empty());

        // Nothing is sent for the failed campaign and no message is left pending
        assert!(h.drain().await.is_empty());
        assert!(h.gateway.sent().await.is_empty());
        let statuses: Vec<String> = h
            .store
            .messages_of(campaign.id)
            .await
            .into_iter()
            .map(|m| m.status)
            .collect();
        assert_eq!(statuses, vec!["FAILED"; 4]);
    }

    #[tokio::test]
    async fn test_submit_pending_uses_fixed_pacing() {
        let h = Harness::new().await;
        let a = h.instance("sales-a", InstanceStatus::Connected).await;

        let mut input = h.new_campaign(vec![a.id], 3);
        input.delay_min_secs = Some(4);
        input.delay_max_secs = Some(4);
        input.scheduled_at = Some(h.clock.now() + chrono::Duration::hours(1));
        let campaign = h.engine.enqueuer().create(input).await.unwrap();

        let pending = h.store.messages_of(campaign.id).await;
        let submitted = submit_pending(&h.engine, &campaign, &pending).await.unwrap();
        assert_eq!(submitted, 3);

        let now = h.clock.now();
        let offsets: Vec<Duration> = h
            .queue
            .pending_for(campaign.id)
            .await
            .iter()
            .map(|j| (j.due_at - now).to_std().unwrap())
            .collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(8), Duration::from_secs(12)]
        );
    }
}
