//! Pulsecast API - REST API server
//!
//! This crate provides the HTTP surface for campaign creation and control,
//! short-link redirects, health checks and metrics.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
