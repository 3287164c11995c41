//! API request handlers

pub mod campaigns;
pub mod health;
pub mod links;
pub mod metrics;

use axum::{http::StatusCode, Json};
use pulsecast_core::CampaignError;
use serde::{Deserialize, Serialize};
use tracing::error;

pub use health::*;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

impl From<CampaignError> for ErrorResponse {
    fn from(e: CampaignError) -> Self {
        Self {
            error: e.code().to_lowercase(),
            message: e.to_string(),
        }
    }
}

/// Map an engine error onto its HTTP status, hiding internal details
pub fn campaign_error(e: CampaignError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Campaign operation failed: {}", e);
        return api_error(status, "internal_error", "Internal server error");
    }
    (status, Json(ErrorResponse::from(e)))
}
