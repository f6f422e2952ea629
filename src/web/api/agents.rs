//! API endpoints for agents.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{parse, reject, ApiError};
use crate::agency::Agency;
use crate::agent::AgentInfo;
use crate::protocol::{AgentId, Status};

/// Create and start an agent.
pub async fn create_agent(
    State(agency): State<Arc<Agency>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AgentInfo>), ApiError> {
    let info: AgentInfo = parse(&body)?;
    let agent = agency.create_agent(info).map_err(reject)?;
    Ok((StatusCode::CREATED, Json(agent.info())))
}

/// Terminate and remove an agent.
pub async fn delete_agent(
    State(agency): State<Arc<Agency>>,
    Path(id): Path<AgentId>,
) -> Result<StatusCode, ApiError> {
    agency.remove_agent(id).map_err(reject)?;
    Ok(StatusCode::OK)
}

pub async fn get_agent_status(
    State(agency): State<Arc<Agency>>,
    Path(id): Path<AgentId>,
) -> Result<Json<Status>, ApiError> {
    agency.agent_status(id).map(Json).map_err(reject)
}

/// Replace the custom configuration of a running agent. The body is taken verbatim.
pub async fn put_agent_custom(
    State(agency): State<Arc<Agency>>,
    Path(id): Path<AgentId>,
    custom: String,
) -> Result<StatusCode, ApiError> {
    agency
        .update_agent_custom(id, custom)
        .await
        .map_err(reject)?;
    Ok(StatusCode::OK)
}
