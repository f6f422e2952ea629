//! API endpoints module.

pub mod agency;
pub mod agents;
pub mod msgs;

pub use agency::get_agency;
pub use agents::{create_agent, delete_agent, get_agent_status, put_agent_custom};
pub use msgs::{post_msgs, post_undeliverable};

use axum::http::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::Error;

pub type ApiError = (StatusCode, String);

/// Map a crate error to a response status.
pub fn reject(e: Error) -> ApiError {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::AlreadyHandled(_) => StatusCode::CONFLICT,
        Error::Json(_) | Error::Rejected { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (status, e.to_string())
}

/// Decode a JSON body, answering 400 on anything malformed.
pub fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("Rejecting malformed body: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })
}
