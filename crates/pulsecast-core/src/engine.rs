//! Engine wiring
//!
//! [`Engine`] bundles the collaborators every component needs and hands out
//! the enqueuer, worker, scheduler and controller built on top of them.

use crate::clock::Clock;
use crate::content::ContentTransformer;
use crate::controller::CampaignController;
use crate::enqueuer::CampaignEnqueuer;
use crate::events::{DispatchEvent, EventBus, TransitionReason};
use crate::gateway::Gateway;
use crate::links::LinkShortener;
use crate::metrics::DispatchMetrics;
use crate::pacing::DelayRange;
use crate::queue::{JobOptions, JobQueue};
use crate::scheduler::CampaignScheduler;
use crate::worker::DispatchWorker;
use pulsecast_common::{Config, Result};
use pulsecast_storage::models::Campaign;
use pulsecast_storage::repository::{
    CampaignRepository, DbCampaignRepository, DbInstanceRepository, DbLinkRepository,
    DbMessageRepository, InstanceRepository, LinkRepository, MessageRepository,
};
use pulsecast_storage::{DatabasePool, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Repository handles used by the engine
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub links: Arc<dyn LinkRepository>,
}

impl Repositories {
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            messages: Arc::new(DbMessageRepository::new(pool.clone())),
            instances: Arc::new(DbInstanceRepository::new(pool.clone())),
            links: Arc::new(DbLinkRepository::new(pool)),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            campaigns: Arc::new(store.clone()),
            messages: Arc::new(store.clone()),
            instances: Arc::new(store.clone()),
            links: Arc::new(store.clone()),
        }
    }
}

/// Tunables derived from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub job_options: JobOptions,
    /// Pacing for campaigns that do not set their own
    pub default_delay: DelayRange,
    /// Worker sleep when no job is due
    pub poll_interval: Duration,
    pub scheduler_interval: Duration,
    pub scheduler_run_on_start: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            job_options: JobOptions::from_config(&config.dispatch),
            default_delay: DelayRange::from_config(&config.dispatch),
            poll_interval: Duration::from_millis(config.dispatch.poll_interval_ms.max(10)),
            scheduler_interval: Duration::from_secs(config.scheduler.interval_secs.max(1)),
            scheduler_run_on_start: config.scheduler.run_on_start,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            job_options: JobOptions::default(),
            default_delay: DelayRange::default(),
            poll_interval: Duration::from_millis(500),
            scheduler_interval: Duration::from_secs(30),
            scheduler_run_on_start: true,
        }
    }
}

/// Shared engine state; cheap to clone
#[derive(Clone)]
pub struct Engine {
    pub(crate) repos: Repositories,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) transformer: ContentTransformer,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventBus,
    pub(crate) metrics: DispatchMetrics,
    pub(crate) settings: EngineSettings,
}

impl Engine {
    pub fn new(
        repos: Repositories,
        queue: Arc<dyn JobQueue>,
        gateway: Arc<dyn Gateway>,
        shortener: Arc<dyn LinkShortener>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Result<Self> {
        Ok(Self {
            repos,
            queue,
            gateway,
            transformer: ContentTransformer::new(shortener),
            clock,
            events: EventBus::default(),
            metrics: DispatchMetrics::new()?,
            settings,
        })
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn enqueuer(&self) -> CampaignEnqueuer {
        CampaignEnqueuer::new(self.clone())
    }

    pub fn controller(&self) -> CampaignController {
        CampaignController::new(self.clone())
    }

    pub fn worker(&self) -> DispatchWorker {
        DispatchWorker::new(self.clone())
    }

    pub fn scheduler(&self) -> CampaignScheduler {
        CampaignScheduler::new(self.clone())
    }

    /// Record a status change in metrics, events and the log
    pub(crate) fn announce(&self, campaign: &Campaign, reason: TransitionReason) {
        let Some(status) = campaign.status_enum() else {
            return;
        };

        info!(
            campaign_id = %campaign.id,
            status = %status,
            reason = ?reason,
            "Campaign \"{}\" is now {}",
            campaign.name,
            status
        );
        self.metrics.campaign_transition(status);
        self.events.publish(DispatchEvent::CampaignStatusChanged {
            tenant_id: campaign.tenant_id,
            campaign_id: campaign.id,
            status,
            reason,
        });
    }
}
