//! Outbound links to remote agencies.
//!
//! Every remote agency this process has ever addressed gets one link: a bounded
//! queue plus a worker task that drains it in batches and posts them to the peer.
//! Delivery is bounded-effort. A failed post is retried once against a freshly
//! resolved address, then the batch is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgencyName, AgentId};

/// Network boundary between agencies.
#[async_trait]
pub trait AgencyTransport: Send + Sync {
    /// Resolve an agency name to a network host.
    async fn resolve_host(&self, agency: &str) -> Result<String>;

    /// Post a batch of messages to the agency at `host`.
    async fn post_msgs(&self, host: &str, msgs: &[AclMessage]) -> Result<StatusCode>;

    /// Hand a message back to the agency that sent it.
    async fn return_undeliverable(&self, agency: &str, msg: &AclMessage) -> Result<StatusCode>;
}

/// Upper bound on the number of messages in one posted batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Parameters shared by all links of one agency.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Stamped into `agency_sender` of every outgoing message
    pub own_agency: AgencyName,
    /// Clamped to `1..=MAX_BATCH_SIZE`
    pub batch_size: usize,
    pub queue_capacity: usize,
}

/// Sending side of the link to one remote agency.
#[derive(Debug)]
pub struct RemoteAgencyLink {
    remote: AgencyName,
    tx: mpsc::Sender<AclMessage>,
    closed: CancellationToken,
}

impl RemoteAgencyLink {
    /// Create a link and the worker that drains it, without starting the worker.
    pub fn new(
        remote: impl Into<AgencyName>,
        settings: &LinkSettings,
        transport: Arc<dyn AgencyTransport>,
        shutdown: &CancellationToken,
    ) -> (Arc<Self>, BatchWorker) {
        let remote = remote.into();
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let closed = shutdown.child_token();

        let link = Arc::new(Self {
            remote: remote.clone(),
            tx,
            closed: closed.clone(),
        });
        let worker = BatchWorker {
            remote,
            own_agency: settings.own_agency.clone(),
            batch_size: settings.batch_size.clamp(1, MAX_BATCH_SIZE),
            transport,
            rx,
            closed,
        };
        (link, worker)
    }

    /// Create a link and start its worker task.
    pub fn spawn(
        remote: impl Into<AgencyName>,
        settings: &LinkSettings,
        transport: Arc<dyn AgencyTransport>,
        shutdown: &CancellationToken,
    ) -> Arc<Self> {
        let (link, worker) = Self::new(remote, settings, transport, shutdown);
        tokio::spawn(worker.run());
        link
    }

    /// Queue a message for the remote agency, waiting while the queue is full.
    pub async fn enqueue(&self, msg: AclMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::inactive(format!("link to {}", self.remote)));
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::inactive(format!("link to {}", self.remote))),
            res = self.tx.send(msg) => res.map_err(|_| Error::inactive(format!("link to {}", self.remote))),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Task side of a link.
pub struct BatchWorker {
    remote: AgencyName,
    own_agency: AgencyName,
    batch_size: usize,
    transport: Arc<dyn AgencyTransport>,
    rx: mpsc::Receiver<AclMessage>,
    closed: CancellationToken,
}

impl BatchWorker {
    /// Drain the link until it is closed or the remote agency becomes unresolvable.
    pub async fn run(mut self) {
        let mut host = match self.transport.resolve_host(&self.remote).await {
            Ok(host) => host,
            Err(e) => {
                tracing::error!("Cannot resolve agency {}: {}", self.remote, e);
                self.closed.cancel();
                return;
            }
        };
        tracing::debug!(agency = %self.remote, host = %host, "Link started");

        loop {
            let first = tokio::select! {
                biased;
                _ = self.closed.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let batch = self.collect(first);

            let Err(reason) = self.post(&host, &batch).await else {
                continue;
            };
            tracing::warn!(
                "Posting {} messages to {} failed ({}), re-resolving",
                batch.len(),
                self.remote,
                reason
            );
            host = match self.transport.resolve_host(&self.remote).await {
                Ok(host) => host,
                Err(e) => {
                    tracing::error!("Cannot resolve agency {}: {}, closing link", self.remote, e);
                    self.closed.cancel();
                    break;
                }
            };
            if let Err(reason) = self.post(&host, &batch).await {
                tracing::error!(
                    "Dropping {} messages for {}: {}",
                    batch.len(),
                    self.remote,
                    reason
                );
            }
        }
        tracing::debug!(agency = %self.remote, "Link stopped");
    }

    /// Take `first` plus whatever is already queued, up to the batch size.
    fn collect(&mut self, first: AclMessage) -> Vec<AclMessage> {
        let mut batch = Vec::with_capacity(self.batch_size.min(self.rx.len() + 1));
        batch.push(first);
        while batch.len() < self.batch_size {
            match self.rx.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(_) => break,
            }
        }
        for msg in &mut batch {
            msg.agency_sender = self.own_agency.clone();
            msg.agency_receiver = self.remote.clone();
        }
        batch
    }

    async fn post(&self, host: &str, batch: &[AclMessage]) -> std::result::Result<(), String> {
        match self.transport.post_msgs(host, batch).await {
            Ok(status) if status.is_success() => Ok(()),
            Ok(status) => Err(format!("wrong http code {}", status)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Stand-in for an agent hosted on another agency.
///
/// Delivering to the proxy queues the message on the agency's link.
#[derive(Debug)]
pub struct RemoteAgent {
    agent_id: AgentId,
    link: Arc<RemoteAgencyLink>,
    active: CancellationToken,
}

impl RemoteAgent {
    pub fn new(agent_id: AgentId, link: Arc<RemoteAgencyLink>) -> Self {
        Self {
            agent_id,
            link,
            active: CancellationToken::new(),
        }
    }

    pub async fn deliver(&self, msg: AclMessage) -> Result<()> {
        if !self.is_active() {
            return Err(Error::inactive(format!("remote agent {}", self.agent_id)));
        }
        self.link.enqueue(msg).await
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn agency(&self) -> &str {
        self.link.remote()
    }

    /// Stop accepting messages for this agent. The link stays open for others.
    pub fn close(&self) {
        self.active.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_cancelled() && !self.link.is_closed()
    }
}
