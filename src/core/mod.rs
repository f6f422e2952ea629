//! Core module - agent communication substrate.
//!
//! This module contains the heart of message delivery:
//! - Per-agent ACL with mailbox, protocol routing and address book
//! - Address resolution against the placement registry
//! - Batching links to remote agencies
//! - The agency router tying local agents, remote agents and links together

pub mod acl;
pub mod link;
pub mod resolver;
pub mod router;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

pub use acl::{Acl, AddressLookup, Recipient};
pub use link::{AgencyTransport, LinkSettings, RemoteAgencyLink, RemoteAgent, MAX_BATCH_SIZE};
pub use resolver::{AddressResolver, AgencyContext, PlacementRegistry};
pub use router::{AgencyRouter, InboundFailurePolicy, ReceiveScalingPolicy, RouterSettings};
pub use routing::ProtocolRouter;
