//! HTTP clients for peer agencies and the placement registry.

pub mod agency;
pub mod registry;
pub mod retry;

pub use agency::AgencyClient;
pub use registry::RegistryClient;
pub use retry::{with_retries, RetryPolicy};

use reqwest::{Response, StatusCode};

use crate::error::{Error, Result};

/// Turn a non-success response into the matching error.
pub(crate) async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(body),
        StatusCode::CONFLICT => Error::Conflict(body),
        s if s.is_server_error() => Error::Transport(format!("{}: {}", s, body)),
        s => Error::Rejected {
            status: s.as_u16(),
            body,
        },
    })
}
