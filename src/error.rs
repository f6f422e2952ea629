//! Error types for the agency runtime.

use thiserror::Error;

use crate::protocol::types::{AgentId, ProtocolId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// ACL, mailbox, link or behavior used after it was closed.
    #[error("{0} not active")]
    Inactive(String),

    /// The placement registry reports no agency for the receiver.
    #[error("receiver {0} is not active")]
    ReceiverNotActive(AgentId),

    /// The placement registry placed a remote agent on this very agency.
    #[error("addressing inconsistency: agent {agent} resolved to own agency {agency}")]
    AddressingInconsistency { agent: AgentId, agency: String },

    #[error("protocol {0} is already handled")]
    ProtocolAlreadyHandled(ProtocolId),

    #[error("protocol {0} is not handled")]
    ProtocolNotHandled(ProtocolId),

    #[error("{0} is already handled")]
    AlreadyHandled(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Behavior error: {0}")]
    Behavior(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A peer answered with a client error status.
    #[error("Request rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn inactive(what: impl Into<String>) -> Self {
        Error::Inactive(what.into())
    }

    /// Only network-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Http(_))
    }
}
