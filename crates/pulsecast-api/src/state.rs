//! Shared state and tenant scoping

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use pulsecast_common::types::TenantId;
use pulsecast_core::{Engine, TrackedLinkShortener};
use pulsecast_storage::DatabasePool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Header carrying the caller's tenant
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub links: Arc<TrackedLinkShortener>,
    /// Absent when running on in-memory storage
    pub db_pool: Option<DatabasePool>,
}

/// Tenant the request acts on behalf of
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: TenantId,
}

/// Read the tenant from the request header
pub fn extract_tenant(req: &Request) -> Option<TenantId> {
    req.headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// Tenant middleware
///
/// Authentication happens upstream; this only scopes the request.
pub async fn tenant_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let tenant_id = extract_tenant(&request).ok_or_else(|| {
        warn!("Missing or invalid tenant header in request to {}", request.uri().path());
        StatusCode::BAD_REQUEST
    })?;

    request.extensions_mut().insert(TenantContext { tenant_id });
    Ok(next.run(request).await)
}
