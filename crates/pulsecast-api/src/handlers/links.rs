//! Short-link redirect handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Redirect,
};
use std::sync::Arc;
use tracing::error;

use super::{api_error, ApiError};
use crate::state::AppState;

/// Count the click and redirect to the original URL
///
/// GET /l/:code
pub async fn follow_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Redirect, ApiError> {
    match state.links.resolve(&code).await {
        Ok(Some(link)) => Ok(Redirect::temporary(&link.original_url)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "Link not found",
        )),
        Err(e) => {
            error!("Failed to resolve short link {}: {}", code, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to resolve link",
            ))
        }
    }
}
