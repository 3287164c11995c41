//! Campaign scheduler - periodic promotion and expiry sweeps
//!
//! Each tick promotes `SCHEDULED` campaigns whose start time has passed and
//! closes `PROCESSING` campaigns whose end time has passed. A failure on one
//! campaign is logged and the sweep moves on to the next.

use crate::engine::Engine;
use crate::error::CampaignResult;
use crate::events::TransitionReason;
use crate::queue::cancel_campaign_jobs;
use pulsecast_common::types::CampaignStatus;
use pulsecast_storage::models::Campaign;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Scheduled campaigns moved to `PROCESSING`
    pub promoted: usize,
    /// Scheduled campaigns completed on promotion with nothing to send
    pub completed_empty: usize,
    /// Running campaigns closed at their end time
    pub expired: usize,
    /// Campaigns skipped because of an error
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Promotion {
    Started,
    CompletedEmpty,
    /// Another sweep got there first
    Skipped,
}

/// Campaign Scheduler
pub struct CampaignScheduler {
    engine: Engine,
}

impl CampaignScheduler {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Sweep on a fixed interval until cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.engine.settings.scheduler_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Campaign scheduler started (interval: {:?})", period);

        if !self.engine.settings.scheduler_run_on_start {
            // The first tick completes immediately
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.tick().await;
            if report != SweepReport::default() {
                info!(
                    promoted = report.promoted,
                    completed_empty = report.completed_empty,
                    expired = report.expired,
                    errors = report.errors,
                    "Scheduler sweep finished"
                );
            }
        }

        info!("Campaign scheduler stopped");
    }

    /// Run both sweeps once
    pub async fn tick(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.engine.clock.now();

        match self.engine.repos.campaigns.list_scheduled_due(now).await {
            Ok(due) => {
                for campaign in due {
                    match self.promote(&campaign).await {
                        Ok(Promotion::Started) => report.promoted += 1,
                        Ok(Promotion::CompletedEmpty) => report.completed_empty += 1,
                        Ok(Promotion::Skipped) => {}
                        Err(e) => {
                            error!(campaign_id = %campaign.id, "Failed to start scheduled campaign: {}", e);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to list scheduled campaigns: {}", e);
                report.errors += 1;
            }
        }

        match self.engine.repos.campaigns.list_expired(now).await {
            Ok(expired) => {
                for campaign in expired {
                    match self.expire(&campaign).await {
                        Ok(true) => report.expired += 1,
                        Ok(false) => {}
                        Err(e) => {
                            error!(campaign_id = %campaign.id, "Failed to expire campaign: {}", e);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to list expired campaigns: {}", e);
                report.errors += 1;
            }
        }

        report
    }

    async fn promote(&self, campaign: &Campaign) -> CampaignResult<Promotion> {
        let repos = &self.engine.repos;
        let Some(started) = repos
            .campaigns
            .transition(
                campaign.id,
                &[CampaignStatus::Scheduled],
                CampaignStatus::Processing,
            )
            .await?
        else {
            debug!(campaign_id = %campaign.id, "Campaign no longer scheduled");
            return Ok(Promotion::Skipped);
        };

        let pending = repos.messages.list_pending(campaign.id).await?;
        if pending.is_empty() {
            warn!(campaign_id = %campaign.id, "Scheduled campaign has nothing to send");
            if let Some(completed) = repos
                .campaigns
                .transition(
                    campaign.id,
                    &[CampaignStatus::Processing],
                    CampaignStatus::Completed,
                )
                .await?
            {
                self.engine.announce(&completed, TransitionReason::Completed);
            }
            return Ok(Promotion::CompletedEmpty);
        }

        // A failed submission returns the campaign to SCHEDULED for the next sweep
        let controller = self.engine.controller();
        controller
            .submit_or_roll_back(&started, &pending, CampaignStatus::Scheduled)
            .await?;
        self.engine.announce(&started, TransitionReason::Promoted);
        // Every message may have been failed for a missing instance
        controller.check_completion(campaign.id).await?;
        Ok(Promotion::Started)
    }

    async fn expire(&self, campaign: &Campaign) -> CampaignResult<bool> {
        let repos = &self.engine.repos;
        let Some(completed) = repos
            .campaigns
            .transition(
                campaign.id,
                &[CampaignStatus::Processing],
                CampaignStatus::Completed,
            )
            .await?
        else {
            return Ok(false);
        };

        let removed = cancel_campaign_jobs(self.engine.queue.as_ref(), campaign.id)
            .await?
            .len();
        let failed = repos.messages.fail_pending(campaign.id).await?;
        info!(
            campaign_id = %campaign.id,
            removed,
            failed,
            "Campaign \"{}\" reached its end time",
            campaign.name
        );

        self.engine.announce(&completed, TransitionReason::Expired);
        Ok(true)
    }
}
