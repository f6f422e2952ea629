//! Route definitions for web server.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::api;
use crate::agency::Agency;

/// Create the agency API router.
pub fn create_api_router() -> Router<Arc<Agency>> {
    Router::new()
        .route("/agency", get(api::get_agency))
        // Agents
        .route("/agency/agents", post(api::create_agent))
        .route("/agency/agents/:id", delete(api::delete_agent))
        .route("/agency/agents/:id/status", get(api::get_agent_status))
        .route("/agency/agents/:id/custom", put(api::put_agent_custom))
        // Peer agencies
        .route("/agency/msgs", post(api::post_msgs))
        .route("/agency/msgundeliv", post(api::post_undeliverable))
}

/// Create the full app router.
pub fn create_app_router(agency: Arc<Agency>) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/health", get(health_check))
        .with_state(agency)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
