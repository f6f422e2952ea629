//! Protocol routing for one agent.
//!
//! A behavior can claim every message of one interaction protocol by registering
//! its own inbox here. Messages of unclaimed protocols stay in the agent's
//! default mailbox.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::protocol::{MailboxSender, ProtocolId};

/// Table from protocol id to the inbox claiming it.
#[derive(Debug, Default)]
pub struct ProtocolRouter {
    routes: DashMap<ProtocolId, MailboxSender>,
}

impl ProtocolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a protocol. Fails if another inbox already holds it.
    pub fn register(&self, protocol: ProtocolId, inbox: MailboxSender) -> Result<()> {
        match self.routes.entry(protocol) {
            Entry::Occupied(_) => Err(Error::ProtocolAlreadyHandled(protocol)),
            Entry::Vacant(slot) => {
                slot.insert(inbox);
                Ok(())
            }
        }
    }

    /// Release a protocol. Fails if nothing holds it.
    pub fn deregister(&self, protocol: ProtocolId) -> Result<()> {
        self.routes
            .remove(&protocol)
            .map(|_| ())
            .ok_or(Error::ProtocolNotHandled(protocol))
    }

    /// Inbox registered for `protocol`, if any.
    pub fn route(&self, protocol: ProtocolId) -> Option<MailboxSender> {
        self.routes.get(&protocol).map(|r| r.value().clone())
    }

    pub fn is_registered(&self, protocol: ProtocolId) -> bool {
        self.routes.contains_key(&protocol)
    }

    pub fn clear(&self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
