//! Agent communication layer.
//!
//! Each agent owns one [`Acl`]. It combines the agent's default mailbox, the
//! protocol routing table and an address book of recipients resolved earlier.
//! The address book is a soft cache: entries are added on first use and evicted
//! as soon as a delivery through them fails.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::link::RemoteAgent;
use super::routing::ProtocolRouter;
use crate::audit::AuditSink;
use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgentId, Mailbox, MailboxSender, MalformedMessage, ProtocolId};

/// Where messages for an agent go.
#[derive(Debug, Clone)]
pub enum Recipient {
    Local(Arc<Acl>),
    Remote(Arc<RemoteAgent>),
}

impl Recipient {
    pub async fn deliver(&self, msg: AclMessage) -> Result<()> {
        match self {
            Recipient::Local(acl) => acl.deliver_incoming(msg).await,
            Recipient::Remote(agent) => agent.deliver(msg).await,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Recipient::Local(_))
    }
}

/// Resolves receivers the address book does not know.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, agent_id: AgentId) -> Result<Recipient>;
}

/// Per-agent communication handle.
pub struct Acl {
    agent_id: AgentId,
    mailbox: Mailbox,
    protocols: ProtocolRouter,
    address_book: DashMap<AgentId, Recipient>,
    lookup: Weak<dyn AddressLookup>,
    audit: Arc<dyn AuditSink>,
    active: CancellationToken,
}

impl std::fmt::Debug for Acl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acl")
            .field("agent_id", &self.agent_id)
            .field("active", &self.is_active())
            .field("queued", &self.mailbox.len())
            .finish()
    }
}

impl Acl {
    pub fn new(
        agent_id: AgentId,
        capacity: usize,
        lookup: Weak<dyn AddressLookup>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            agent_id,
            mailbox: Mailbox::new(capacity),
            protocols: ProtocolRouter::new(),
            address_book: DashMap::new(),
            lookup,
            audit,
            active: CancellationToken::new(),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_cancelled()
    }

    /// Token cancelled when the ACL is closed.
    pub fn closed(&self) -> CancellationToken {
        self.active.clone()
    }

    /// Build a message from this agent.
    ///
    /// An out-of-range performative yields `Err`, but the error still carries the
    /// complete message.
    pub fn new_message(
        &self,
        receiver: AgentId,
        protocol: impl Into<ProtocolId>,
        performative: impl Into<i32>,
        content: impl Into<String>,
    ) -> std::result::Result<AclMessage, MalformedMessage> {
        AclMessage::new(self.agent_id, receiver, protocol, performative, content).validate()
    }

    /// Send a message to any agent, local or remote.
    pub async fn send(&self, mut msg: AclMessage) -> Result<()> {
        self.ensure_active()?;
        msg.timestamp = Utc::now();
        msg.sender = self.agent_id;
        let receiver = msg.receiver;

        let cached = self.address_book.get(&receiver).map(|r| r.value().clone());
        if let Some(recipient) = cached {
            match recipient.deliver(msg.clone()).await {
                Ok(()) => {
                    self.audit.record("ACL send", &msg);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        "Agent {}: cached address of {} failed ({}), resolving again",
                        self.agent_id,
                        receiver,
                        e
                    );
                    self.address_book.remove(&receiver);
                }
            }
        }

        let lookup = self
            .lookup
            .upgrade()
            .ok_or_else(|| Error::inactive("agency router"))?;
        let recipient = lookup.lookup(receiver).await?;
        self.address_book.insert(receiver, recipient.clone());

        if let Err(e) = recipient.deliver(msg.clone()).await {
            self.address_book.remove(&receiver);
            return Err(e);
        }
        self.audit.record("ACL send", &msg);
        Ok(())
    }

    /// Put an incoming message into the protocol inbox claiming it, or the
    /// default mailbox. Waits while the target queue is full.
    pub async fn deliver_incoming(&self, msg: AclMessage) -> Result<()> {
        self.ensure_active()?;
        self.audit.record("ACL receive", &msg);
        match self.protocols.route(msg.protocol) {
            Some(inbox) => inbox.deliver(msg).await,
            None => self.mailbox.deliver(msg).await,
        }
    }

    /// Every message in the default mailbox, without waiting.
    pub fn receive_all(&self) -> Result<Vec<AclMessage>> {
        self.ensure_active()?;
        self.mailbox.receive_all()
    }

    /// Wait for the next message in the default mailbox.
    ///
    /// Returns an inactive error when the ACL is closed while waiting.
    pub async fn receive_blocking(&self) -> Result<AclMessage> {
        self.ensure_active()?;
        self.mailbox.receive_blocking().await
    }

    /// Route all messages of `protocol` to `inbox` instead of the default mailbox.
    pub fn register_protocol(&self, protocol: ProtocolId, inbox: MailboxSender) -> Result<()> {
        self.ensure_active()?;
        self.protocols.register(protocol, inbox)
    }

    pub fn deregister_protocol(&self, protocol: ProtocolId) -> Result<()> {
        self.ensure_active()?;
        self.protocols.deregister(protocol)
    }

    /// Drop the cached recipient for `agent_id`.
    pub fn forget(&self, agent_id: AgentId) {
        self.address_book.remove(&agent_id);
    }

    pub fn knows(&self, agent_id: AgentId) -> bool {
        self.address_book.contains_key(&agent_id)
    }

    /// Deactivate the ACL. Safe to call repeatedly.
    pub fn close(&self) {
        if self.active.is_cancelled() {
            return;
        }
        self.active.cancel();
        self.mailbox.close();
        self.protocols.clear();
        self.address_book.clear();
        tracing::debug!("ACL of agent {} closed", self.agent_id);
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::inactive(format!("ACL of agent {}", self.agent_id)))
        }
    }
}
