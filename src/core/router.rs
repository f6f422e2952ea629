//! Process-wide message routing.
//!
//! The [`AgencyRouter`] knows every local agent, every remote agent addressed so
//! far and one outbound link per remote agency. It answers address lookups for
//! the ACLs, accepts inbound batches from peer agencies and runs the
//! undeliverable-message recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::acl::{Acl, AddressLookup, Recipient};
use super::link::{AgencyTransport, LinkSettings, RemoteAgencyLink, RemoteAgent};
use super::resolver::{AddressResolver, AgencyContext, PlacementRegistry};
use crate::audit::AuditSink;
use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgencyName, AgentId};

/// When to add inbound receive workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveScalingPolicy {
    pub enabled: bool,
    /// Upper bound on receive workers, the initial one included
    pub max_workers: usize,
}

impl Default for ReceiveScalingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 8,
        }
    }
}

impl ReceiveScalingPolicy {
    /// Whether a newly created remote link warrants one more receive worker.
    pub fn should_add_worker(&self, remote_agencies: usize, local_agents: usize, workers: usize) -> bool {
        self.enabled && workers < self.max_workers && remote_agencies > local_agents
    }
}

/// What a receive worker does when handing back an undeliverable message fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundFailurePolicy {
    /// Stop the worker. Inbound batches stay queued until another worker runs.
    #[default]
    Terminate,
    /// Log the failure and go on with the next message.
    Continue,
}

/// Queue sizes and policies of a router.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub mailbox_capacity: usize,
    pub inbound_capacity: usize,
    pub link_capacity: usize,
    pub batch_size: usize,
    pub scaling: ReceiveScalingPolicy,
    pub on_inbound_failure: InboundFailurePolicy,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            inbound_capacity: 1000,
            link_capacity: 1000,
            batch_size: 100,
            scaling: ReceiveScalingPolicy::default(),
            on_inbound_failure: InboundFailurePolicy::default(),
        }
    }
}

/// Routing tables and workers of one agency.
pub struct AgencyRouter {
    context: AgencyContext,
    settings: RouterSettings,
    link_settings: LinkSettings,
    local_agents: DashMap<AgentId, Arc<Acl>>,
    remote_agents: DashMap<AgentId, Arc<RemoteAgent>>,
    remote_links: DashMap<AgencyName, Arc<RemoteAgencyLink>>,
    resolver: AddressResolver,
    transport: Arc<dyn AgencyTransport>,
    audit: Arc<dyn AuditSink>,
    inbound_tx: mpsc::Sender<Vec<AclMessage>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<AclMessage>>>,
    workers: AtomicUsize,
    shutdown: CancellationToken,
    this: Weak<AgencyRouter>,
}

impl AgencyRouter {
    /// Create the router and start its first receive worker.
    pub fn new(
        context: AgencyContext,
        settings: RouterSettings,
        registry: Arc<dyn PlacementRegistry>,
        transport: Arc<dyn AgencyTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_capacity.max(1));
        let link_settings = LinkSettings {
            own_agency: context.name.clone(),
            batch_size: settings.batch_size,
            queue_capacity: settings.link_capacity,
        };

        let router = Arc::new_cyclic(|this| Self {
            resolver: AddressResolver::new(context.clone(), registry),
            context,
            settings,
            link_settings,
            local_agents: DashMap::new(),
            remote_agents: DashMap::new(),
            remote_links: DashMap::new(),
            transport,
            audit,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            workers: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            this: this.clone(),
        });
        router.spawn_receive_worker();
        router
    }

    pub fn context(&self) -> &AgencyContext {
        &self.context
    }

    /// Create and register the ACL of a new local agent.
    pub fn register_agent(&self, agent_id: AgentId) -> Result<Arc<Acl>> {
        let lookup: Weak<dyn AddressLookup> = self.this.clone();
        let acl = match self.local_agents.entry(agent_id) {
            Entry::Occupied(_) => {
                return Err(Error::Conflict(format!("agent {} already exists", agent_id)))
            }
            Entry::Vacant(slot) => {
                let acl = Arc::new(Acl::new(
                    agent_id,
                    self.settings.mailbox_capacity,
                    lookup,
                    self.audit.clone(),
                ));
                slot.insert(acl.clone());
                acl
            }
        };
        // the agent may have been known here as remote before
        if let Some((_, stale)) = self.remote_agents.remove(&agent_id) {
            stale.close();
        }
        tracing::debug!("Registered local agent {}", agent_id);
        Ok(acl)
    }

    /// Remove a local agent and close its ACL.
    pub fn deregister_agent(&self, agent_id: AgentId) -> Option<Arc<Acl>> {
        let (_, acl) = self.local_agents.remove(&agent_id)?;
        acl.close();
        tracing::debug!("Deregistered local agent {}", agent_id);
        Some(acl)
    }

    pub fn local_agent(&self, agent_id: AgentId) -> Option<Arc<Acl>> {
        self.local_agents.get(&agent_id).map(|a| a.value().clone())
    }

    pub fn local_agent_count(&self) -> usize {
        self.local_agents.len()
    }

    pub fn knows_remote_agent(&self, agent_id: AgentId) -> bool {
        self.remote_agents.contains_key(&agent_id)
    }

    /// Names of all remote agencies with an open link.
    pub fn remote_agencies(&self) -> Vec<AgencyName> {
        self.remote_links
            .iter()
            .filter(|l| !l.value().is_closed())
            .map(|l| l.key().clone())
            .collect()
    }

    pub fn receive_workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Queue a batch received from a peer agency.
    pub async fn accept_inbound(&self, batch: Vec<AclMessage>) -> Result<()> {
        if self.receive_workers() == 0 {
            tracing::warn!("No receive worker running, inbound batch stays queued");
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::inactive("agency router")),
            res = self.inbound_tx.send(batch) => res.map_err(|_| Error::inactive("agency router")),
        }
    }

    /// Recover from a message a peer agency could not deliver.
    ///
    /// Only messages this agency sent on behalf of a local agent to a known
    /// remote agent are retried: the stale proxy is dropped and the sender sends
    /// again, which resolves the receiver anew. Anything else is ignored.
    pub async fn resend_undeliverable(&self, msg: AclMessage) {
        let Some(remote) = self.remote_agents.get(&msg.receiver).map(|r| r.value().clone()) else {
            tracing::debug!("Ignoring undeliverable message for unknown agent {}", msg.receiver);
            return;
        };
        let Some(sender) = self.local_agent(msg.sender) else {
            tracing::debug!("Ignoring undeliverable message from non-local agent {}", msg.sender);
            return;
        };

        remote.close();
        self.remote_agents
            .remove_if(&msg.receiver, |_, r| Arc::ptr_eq(r, &remote));
        tracing::info!(
            "Message from {} to {} was undeliverable at {}, resending",
            msg.sender,
            msg.receiver,
            remote.agency()
        );
        let receiver = msg.receiver;
        if let Err(e) = sender.send(msg).await {
            tracing::warn!("Resending message to {} failed: {}", receiver, e);
        }
    }

    /// Stop links and receive workers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for remote in self.remote_agents.iter() {
            remote.value().close();
        }
    }

    fn find_or_create_link(&self, agency: &str) -> Arc<RemoteAgencyLink> {
        let (link, created) = match self.remote_links.entry(agency.to_string()) {
            Entry::Occupied(mut slot) if slot.get().is_closed() => {
                let link = self.spawn_link(agency);
                slot.insert(link.clone());
                (link, true)
            }
            Entry::Occupied(slot) => (slot.get().clone(), false),
            Entry::Vacant(slot) => {
                let link = self.spawn_link(agency);
                slot.insert(link.clone());
                (link, true)
            }
        };

        if created {
            tracing::info!("Started link to agency {}", agency);
            let remotes = self.remote_links.len();
            let locals = self.local_agents.len();
            if self
                .settings
                .scaling
                .should_add_worker(remotes, locals, self.receive_workers())
            {
                self.spawn_receive_worker();
            }
        }
        link
    }

    fn spawn_link(&self, agency: &str) -> Arc<RemoteAgencyLink> {
        RemoteAgencyLink::spawn(
            agency,
            &self.link_settings,
            self.transport.clone(),
            &self.shutdown,
        )
    }

    fn spawn_receive_worker(&self) {
        let Some(router) = self.this.upgrade() else {
            return;
        };
        let worker = self.workers.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            router.receive_loop(worker).await;
            router.workers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn receive_loop(&self, worker: usize) {
        tracing::info!("Started receive worker {}", worker);
        loop {
            let batch = {
                let mut rx = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    rx = self.inbound_rx.lock() => rx,
                };
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                }
            };

            if let Err(e) = self.dispatch_inbound(batch).await {
                tracing::error!("Receive worker {} stopped: {}", worker, e);
                return;
            }
        }
        tracing::debug!("Receive worker {} shut down", worker);
    }

    /// Deliver a batch locally, handing back what cannot be delivered.
    async fn dispatch_inbound(&self, batch: Vec<AclMessage>) -> Result<()> {
        for msg in batch {
            if let Some(acl) = self.local_agent(msg.receiver) {
                match acl.deliver_incoming(msg.clone()).await {
                    Ok(()) => continue,
                    Err(e) => tracing::debug!("Delivery to agent {} failed: {}", msg.receiver, e),
                }
            }

            if let Err(e) = self.return_undeliverable(&msg).await {
                match self.settings.on_inbound_failure {
                    InboundFailurePolicy::Terminate => return Err(e),
                    InboundFailurePolicy::Continue => tracing::warn!(
                        "Returning message for {} to {} failed: {}",
                        msg.receiver,
                        msg.agency_sender,
                        e
                    ),
                }
            }
        }
        Ok(())
    }

    async fn return_undeliverable(&self, msg: &AclMessage) -> Result<()> {
        if msg.agency_sender.is_empty() {
            tracing::warn!("Dropping undeliverable message for {} without sender agency", msg.receiver);
            return Ok(());
        }
        let status = self
            .transport
            .return_undeliverable(&msg.agency_sender, msg)
            .await?;
        if !status.is_success() {
            tracing::warn!(
                "Agency {} answered {} to undeliverable message",
                msg.agency_sender,
                status
            );
        }
        Ok(())
    }
}

#[async_trait]
impl AddressLookup for AgencyRouter {
    /// Local agents first, then known remote agents, then the placement registry.
    async fn lookup(&self, agent_id: AgentId) -> Result<Recipient> {
        if let Some(acl) = self.local_agent(agent_id) {
            return Ok(Recipient::Local(acl));
        }

        let known = self.remote_agents.get(&agent_id).map(|r| r.value().clone());
        if let Some(remote) = known {
            if remote.is_active() {
                return Ok(Recipient::Remote(remote));
            }
            self.remote_agents
                .remove_if(&agent_id, |_, r| Arc::ptr_eq(r, &remote));
        }

        let agency = self.resolver.resolve_remote(agent_id).await?;
        let link = self.find_or_create_link(&agency);
        let remote = Arc::new(RemoteAgent::new(agent_id, link));
        self.remote_agents.insert(agent_id, remote.clone());
        tracing::info!("Agent {} lives on agency {}", agent_id, agency);
        Ok(Recipient::Remote(remote))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audit::NoAudit;
    use crate::core::testing::{MockRegistry, MockTransport};
    use crate::protocol::{Performative, Protocol};

    struct Fixture {
        router: Arc<AgencyRouter>,
        registry: Arc<MockRegistry>,
        transport: Arc<MockTransport>,
    }

    fn fixture(settings: RouterSettings) -> Fixture {
        let registry = Arc::new(MockRegistry::new());
        let transport = Arc::new(MockTransport::new());
        let router = AgencyRouter::new(
            AgencyContext::new("A", 0),
            settings,
            registry.clone(),
            transport.clone(),
            Arc::new(NoAudit),
        );
        Fixture {
            router,
            registry,
            transport,
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn inbound(receiver: AgentId, from_agency: &str) -> AclMessage {
        let mut msg = AclMessage::new(50, receiver, Protocol::None, Performative::Inform, "in");
        msg.agency_sender = from_agency.to_string();
        msg.agency_receiver = "A".to_string();
        msg
    }

    #[tokio::test]
    async fn test_local_ping() {
        let f = fixture(RouterSettings::default());
        let a1 = f.router.register_agent(1).unwrap();
        let a2 = f.router.register_agent(2).unwrap();

        let msg = a1
            .new_message(2, Protocol::Query, Performative::Inform, "ping")
            .unwrap();
        a1.send(msg).await.unwrap();

        let got = a2.receive_blocking().await.unwrap();
        assert_eq!(got.sender, 1);
        assert_eq!(got.content, "ping");
        assert_eq!(f.registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_send_is_batched_to_agency() {
        let f = fixture(RouterSettings::default());
        f.registry.place(99, "B");
        let a1 = f.router.register_agent(1).unwrap();

        let msg = a1
            .new_message(99, Protocol::Request, Performative::Request, "work")
            .unwrap();
        a1.send(msg).await.unwrap();
        f.transport.wait_for_messages(1, Duration::from_secs(2)).await;

        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].agency_sender, "A");
        assert_eq!(batches[0][0].agency_receiver, "B");
        assert_eq!(f.router.remote_agencies(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let f = fixture(RouterSettings::default());
        f.registry.place(99, "B");
        let a1 = f.router.register_agent(1).unwrap();
        let a2 = f.router.register_agent(2).unwrap();

        for acl in [&a1, &a1, &a2] {
            let msg = AclMessage::new(0, 99, Protocol::None, Performative::Inform, "x");
            acl.send(msg).await.unwrap();
        }
        f.transport.wait_for_messages(3, Duration::from_secs(2)).await;
        assert_eq!(f.registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_inconsistent_placement_fails_send() {
        let f = fixture(RouterSettings::default());
        f.registry.place(5, "A");
        let a1 = f.router.register_agent(1).unwrap();

        let msg = AclMessage::new(1, 5, Protocol::None, Performative::Inform, "x");
        let err = a1.send(msg).await.unwrap_err();
        assert!(matches!(err, Error::AddressingInconsistency { agent: 5, .. }));

        let msg = AclMessage::new(1, 6, Protocol::None, Performative::Inform, "x");
        assert!(matches!(a1.send(msg).await, Err(Error::ReceiverNotActive(6))));
    }

    #[tokio::test]
    async fn test_duplicate_agent_conflicts() {
        let f = fixture(RouterSettings::default());
        f.router.register_agent(1).unwrap();
        assert!(matches!(f.router.register_agent(1), Err(Error::Conflict(_))));

        let acl = f.router.deregister_agent(1).unwrap();
        assert!(!acl.is_active());
        f.router.register_agent(1).unwrap();
    }

    #[tokio::test]
    async fn test_inbound_for_local_agent() {
        let f = fixture(RouterSettings::default());
        let a2 = f.router.register_agent(2).unwrap();

        f.router.accept_inbound(vec![inbound(2, "B")]).await.unwrap();
        let got = a2.receive_blocking().await.unwrap();
        assert_eq!(got.sender, 50);
        assert!(f.transport.returns().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_for_unknown_agent_is_returned() {
        let f = fixture(RouterSettings::default());
        f.router.register_agent(2).unwrap();

        f.router.accept_inbound(vec![inbound(7, "B")]).await.unwrap();
        f.transport.wait_for_returns(1, Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let returns = f.transport.returns();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].0, "B");
        assert_eq!(returns[0].1.receiver, 7);
    }

    #[tokio::test]
    async fn test_inbound_for_closed_agent_is_returned() {
        let f = fixture(RouterSettings::default());
        let a2 = f.router.register_agent(2).unwrap();
        a2.close();

        f.router.accept_inbound(vec![inbound(2, "B")]).await.unwrap();
        f.transport.wait_for_returns(1, Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_failed_return_stops_worker_by_default() {
        let f = fixture(RouterSettings::default());
        f.transport.fail_returns(true);
        wait_until(|| f.router.receive_workers() == 1).await;

        f.router.accept_inbound(vec![inbound(7, "B")]).await.unwrap();
        wait_until(|| f.router.receive_workers() == 0).await;
    }

    #[tokio::test]
    async fn test_failed_return_can_be_survived() {
        let settings = RouterSettings {
            on_inbound_failure: InboundFailurePolicy::Continue,
            ..RouterSettings::default()
        };
        let f = fixture(settings);
        f.transport.fail_returns(true);
        let a2 = f.router.register_agent(2).unwrap();

        f.router
            .accept_inbound(vec![inbound(7, "B"), inbound(2, "B")])
            .await
            .unwrap();
        let got = a2.receive_blocking().await.unwrap();
        assert_eq!(got.receiver, 2);
        assert_eq!(f.router.receive_workers(), 1);
    }

    #[tokio::test]
    async fn test_undeliverable_message_is_resent_after_new_resolution() {
        let f = fixture(RouterSettings::default());
        f.registry.place(99, "B");
        let a1 = f.router.register_agent(1).unwrap();

        let msg = AclMessage::new(1, 99, Protocol::None, Performative::Inform, "hello");
        a1.send(msg).await.unwrap();
        f.transport.wait_for_messages(1, Duration::from_secs(2)).await;

        // agent 99 moved, agency B hands the message back
        f.registry.place(99, "C");
        let returned = f.transport.batches()[0][0].clone();
        f.router.resend_undeliverable(returned).await;
        f.transport.wait_for_messages(2, Duration::from_secs(2)).await;

        assert_eq!(f.registry.calls(), 2);
        let batches = f.transport.batches();
        assert_eq!(batches[1][0].agency_receiver, "C");
        assert_eq!(batches[1][0].content, "hello");
    }

    #[tokio::test]
    async fn test_undeliverable_from_foreign_sender_is_ignored() {
        let f = fixture(RouterSettings::default());
        f.registry.place(99, "B");
        let a1 = f.router.register_agent(1).unwrap();
        let msg = AclMessage::new(1, 99, Protocol::None, Performative::Inform, "x");
        a1.send(msg).await.unwrap();

        let foreign = AclMessage::new(42, 99, Protocol::None, Performative::Inform, "x");
        f.router.resend_undeliverable(foreign).await;
        let unknown = AclMessage::new(1, 1234, Protocol::None, Performative::Inform, "x");
        f.router.resend_undeliverable(unknown).await;

        assert!(f.router.knows_remote_agent(99));
        assert_eq!(f.registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_closed_link_is_replaced() {
        let f = fixture(RouterSettings::default());
        f.registry.place(99, "B");
        f.transport.set_unresolvable("B");
        let a1 = f.router.register_agent(1).unwrap();

        let msg = AclMessage::new(1, 99, Protocol::None, Performative::Inform, "x");
        a1.send(msg).await.unwrap();
        wait_until(|| f.router.remote_agencies().is_empty()).await;

        f.transport.set_resolvable("B");
        let msg = AclMessage::new(1, 99, Protocol::None, Performative::Inform, "y");
        assert!(a1.send(msg).await.is_ok());
        assert_eq!(f.registry.calls(), 2);
        assert_eq!(f.router.remote_agencies(), vec!["B".to_string()]);

        f.transport.wait_for_messages(1, Duration::from_secs(2)).await;
        wait_until(|| f.transport.resolve_calls() >= 2).await;
        assert_eq!(f.transport.batches()[0][0].content, "y");
        assert_eq!(f.router.remote_agencies(), vec!["B".to_string()]);
    }

    #[test]
    fn test_scaling_policy() {
        let policy = ReceiveScalingPolicy::default();
        assert!(policy.should_add_worker(3, 2, 1));
        assert!(!policy.should_add_worker(2, 2, 1));
        assert!(!policy.should_add_worker(10, 2, 8));

        let off = ReceiveScalingPolicy {
            enabled: false,
            ..policy
        };
        assert!(!off.should_add_worker(10, 0, 1));
    }

    #[tokio::test]
    async fn test_new_agencies_scale_receive_workers() {
        let f = fixture(RouterSettings::default());
        wait_until(|| f.router.receive_workers() == 1).await;
        f.registry.place(10, "B");
        f.registry.place(11, "C");
        let a1 = f.router.register_agent(1).unwrap();

        for receiver in [10, 11] {
            let msg = AclMessage::new(1, receiver, Protocol::None, Performative::Inform, "x");
            a1.send(msg).await.unwrap();
        }
        // with one local agent only the second remote agency tips the balance
        wait_until(|| f.router.receive_workers() == 2).await;
    }
}
