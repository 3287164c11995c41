//! Repository layer for data access

pub mod campaigns;
pub mod instances;
pub mod links;
pub mod messages;

pub use campaigns::{CampaignRepository, DbCampaignRepository};
pub use instances::{DbInstanceRepository, InstanceRepository};
pub use links::{DbLinkRepository, LinkRepository};
pub use messages::{DbMessageRepository, MessageRepository};
