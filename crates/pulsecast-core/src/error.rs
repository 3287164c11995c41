//! Engine error types

use pulsecast_common::types::CampaignStatus;
use thiserror::Error;

/// Errors surfaced by campaign creation and control
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("No connected instances available")]
    NoEligibleInstances,

    #[error("At least one non-empty message template is required")]
    NoTemplates,

    #[error("Contact list is empty")]
    NoContacts,

    #[error("Invalid pacing: {0}")]
    InvalidPacing(String),

    #[error("Cannot {action} a campaign in status {status}")]
    InvalidState {
        action: &'static str,
        status: CampaignStatus,
    },

    #[error(transparent)]
    Store(#[from] pulsecast_common::Error),
}

impl CampaignError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound => 404,
            CampaignError::NoEligibleInstances
            | CampaignError::NoTemplates
            | CampaignError::NoContacts
            | CampaignError::InvalidPacing(_) => 422,
            CampaignError::InvalidState { .. } => 409,
            CampaignError::Store(e) => e.status_code(),
        }
    }

    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound => "NOT_FOUND",
            CampaignError::NoEligibleInstances => "NO_ELIGIBLE_INSTANCES",
            CampaignError::NoTemplates => "NO_TEMPLATES",
            CampaignError::NoContacts => "NO_CONTACTS",
            CampaignError::InvalidPacing(_) => "INVALID_PACING",
            CampaignError::InvalidState { .. } => "INVALID_STATE",
            CampaignError::Store(e) => e.code(),
        }
    }
}

pub type CampaignResult<T> = std::result::Result<T, CampaignError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_conflict_maps_to_409() {
        let err = CampaignError::InvalidState {
            action: "pause",
            status: CampaignStatus::Completed,
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), "Cannot pause a campaign in status COMPLETED");
    }

    #[test]
    fn test_store_errors_keep_their_status() {
        let err: CampaignError = pulsecast_common::Error::Database("gone".into()).into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), "DATABASE_ERROR");
    }
}
