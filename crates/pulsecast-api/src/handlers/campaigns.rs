//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use pulsecast_common::types::{CampaignStatus, Contact, InstanceId, MediaRef};
use pulsecast_core::{CampaignDetails, NewCampaign};
use pulsecast_storage::models::Campaign;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, campaign_error, ApiError};
use crate::state::{AppState, TenantContext};

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub message: String,
    pub status: String,
    pub total_contacts: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub delay_min: i32,
    pub delay_max: i32,
    pub instance_switch_count: i32,
    pub message_rotation_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            message: c.message,
            status: c.status,
            total_contacts: c.total_contacts,
            sent_count: c.sent_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            delay_min: c.delay_min,
            delay_max: c.delay_max,
            instance_switch_count: c.instance_switch_count,
            message_rotation_count: c.message_rotation_count,
            scheduled_at: c.scheduled_at,
            end_at: c.end_at,
            started_at: c.started_at,
            ended_at: c.ended_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    /// Primary text; used as the only template when `templates` is empty
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub templates: Vec<String>,
    pub instance_ids: Vec<InstanceId>,
    pub contacts: Vec<Contact>,
    pub delay_min: Option<u32>,
    pub delay_max: Option<u32>,
    pub instance_switch_count: Option<u32>,
    pub message_rotation_count: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

impl CreateCampaignRequest {
    fn into_new_campaign(self, tenant: TenantContext) -> NewCampaign {
        let templates = if self.templates.is_empty() {
            vec![self.message.clone()]
        } else {
            self.templates
        };
        NewCampaign {
            tenant_id: tenant.tenant_id,
            name: self.name,
            message: self.message,
            templates,
            instance_ids: self.instance_ids,
            contacts: self.contacts,
            delay_min_secs: self.delay_min,
            delay_max_secs: self.delay_max,
            instance_switch_count: self.instance_switch_count,
            message_rotation_count: self.message_rotation_count,
            scheduled_at: self.scheduled_at,
            end_at: self.end_at,
            media: self.media_url.map(|url| MediaRef {
                url,
                media_type: self.media_type,
            }),
        }
    }
}

/// List campaigns for the tenant
///
/// GET /api/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(s.parse::<CampaignStatus>().map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, "invalid_status", e)
        })?),
        None => None,
    };

    let campaigns = state
        .engine
        .controller()
        .list(tenant.tenant_id, status, query.limit, query.offset)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Scheduled, running and paused campaigns
///
/// GET /api/campaigns/active
pub async fn list_active_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Vec<CampaignResponse>>, ApiError> {
    let campaigns = state
        .engine
        .controller()
        .active(tenant.tenant_id)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaigns.into_iter().map(CampaignResponse::from).collect()))
}

/// Create and start (or schedule) a campaign
///
/// POST /api/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "Campaign name is required",
        ));
    }

    let campaign = state
        .engine
        .enqueuer()
        .create(req.into_new_campaign(tenant))
        .await
        .map_err(campaign_error)?;

    info!(
        tenant_id = %tenant.tenant_id,
        campaign_id = %campaign.id,
        "Created campaign via API"
    );
    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Campaign with its message breakdown
///
/// GET /api/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignDetails>, ApiError> {
    state
        .engine
        .controller()
        .get(tenant.tenant_id, campaign_id)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// POST /api/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .controller()
        .pause(tenant.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(campaign_error)
}

/// POST /api/campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .controller()
        .resume(tenant.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(campaign_error)
}

/// POST /api/campaigns/:campaign_id/stop
pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    state
        .engine
        .controller()
        .stop(tenant.tenant_id, campaign_id)
        .await
        .map(|c| Json(c.into()))
        .map_err(campaign_error)
}

/// DELETE /api/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(campaign_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .controller()
        .delete(tenant.tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;
    Ok(StatusCode::NO_CONTENT)
}
