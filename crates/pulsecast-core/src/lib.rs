//! Pulsecast Core - Campaign dispatch engine
//!
//! This crate turns a campaign definition into paced, rotated message sends:
//! - Creation and job submission ([`CampaignEnqueuer`])
//! - Message delivery with retries ([`DispatchWorker`])
//! - Scheduled start and end times ([`CampaignScheduler`])
//! - Pause, resume, stop and completion ([`CampaignController`])

pub mod clock;
pub mod content;
pub mod controller;
pub mod engine;
pub mod enqueuer;
pub mod error;
pub mod events;
pub mod gateway;
pub mod links;
pub mod metrics;
pub mod pacing;
pub mod queue;
pub mod rotation;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use content::ContentTransformer;
pub use controller::{CampaignController, CampaignDetails};
pub use engine::{Engine, EngineSettings, Repositories};
pub use enqueuer::{CampaignEnqueuer, NewCampaign};
pub use error::{CampaignError, CampaignResult};
pub use events::{DispatchEvent, EventBus, TransitionReason};
pub use gateway::{EvolutionGateway, Gateway, GatewayError, SendReceipt, SendRequest};
pub use links::{LinkShortener, TrackedLinkShortener};
pub use metrics::DispatchMetrics;
pub use pacing::DelayRange;
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue, QueueStats};
pub use rotation::Rotator;
pub use scheduler::{CampaignScheduler, SweepReport};
pub use worker::{DispatchWorker, JobOutcome, JobReport};
