//! Message exchange between agencies.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use super::{parse, reject, ApiError};
use crate::agency::Agency;
use crate::protocol::AclMessage;

/// Accept a batch of messages from a peer agency.
pub async fn post_msgs(
    State(agency): State<Arc<Agency>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let batch: Vec<AclMessage> = parse(&body)?;
    tracing::debug!("Received batch of {} messages", batch.len());
    agency.accept_msgs(batch).await.map_err(reject)?;
    Ok(StatusCode::CREATED)
}

/// A peer could not deliver a message this agency sent.
pub async fn post_undeliverable(
    State(agency): State<Arc<Agency>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let msg: AclMessage = parse(&body)?;
    tokio::spawn(async move {
        agency.resend_undeliverable(msg).await;
    });
    Ok(StatusCode::CREATED)
}
