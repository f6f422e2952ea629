//! Agent communication protocol.
//!
//! This module defines the message-level building blocks:
//! - FIPA performatives, protocols and identifier types
//! - The ACL message record and its wire format
//! - Bounded agent mailboxes

pub mod mailbox;
pub mod message;
pub mod types;

pub use mailbox::{Mailbox, MailboxSender, DEFAULT_MAILBOX_CAPACITY};
pub use message::{AclMessage, MalformedMessage};
pub use types::{AgencyName, AgentId, MasId, Performative, Protocol, ProtocolId, Status, StatusCode};
