//! Protocol behavior: claims one interaction protocol of an agent and dispatches
//! its messages by performative.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{invoke, BehaviorRunner, EventSource, Handler, Registration};
use crate::core::Acl;
use crate::error::Result;
use crate::protocol::{AclMessage, Mailbox, Performative, ProtocolId};

/// Performative dispatch table with a mandatory default arm.
#[derive(Clone)]
pub struct ProtocolHandlers {
    by_performative: HashMap<Performative, Handler<AclMessage>>,
    default: Handler<AclMessage>,
}

impl ProtocolHandlers {
    /// Start a table where every message goes to `default`.
    pub fn new(default: Handler<AclMessage>) -> Self {
        Self {
            by_performative: HashMap::new(),
            default,
        }
    }

    /// Route messages with `performative` to `handler`.
    pub fn on(mut self, performative: Performative, handler: Handler<AclMessage>) -> Self {
        self.by_performative.insert(performative, handler);
        self
    }

    /// Handler for a message. Unmapped and out-of-range performatives get the default.
    pub fn select(&self, msg: &AclMessage) -> &Handler<AclMessage> {
        msg.performative_kind()
            .and_then(|perf| self.by_performative.get(&perf))
            .unwrap_or(&self.default)
    }
}

pub struct ProtocolSource {
    label: String,
    inbox: Arc<Mailbox>,
    handlers: ProtocolHandlers,
}

#[async_trait]
impl EventSource for ProtocolSource {
    type Event = AclMessage;

    async fn next_event(&mut self) -> Option<AclMessage> {
        self.inbox.receive_blocking().await.ok()
    }

    async fn handle(&mut self, msg: AclMessage) {
        let handler = self.handlers.select(&msg).clone();
        invoke(&self.label, &handler, msg).await;
    }
}

struct ProtocolRegistration {
    acl: Arc<Acl>,
    protocol: ProtocolId,
    inbox: Arc<Mailbox>,
}

impl Registration for ProtocolRegistration {
    fn register(&self) -> Result<()> {
        self.acl.register_protocol(self.protocol, self.inbox.sender())
    }

    fn deregister(&self) {
        if let Err(e) = self.acl.deregister_protocol(self.protocol) {
            tracing::debug!("Deregistering protocol {}: {}", self.protocol, e);
        }
        self.inbox.close();
    }
}

pub type ProtocolBehavior = BehaviorRunner<ProtocolSource>;

impl BehaviorRunner<ProtocolSource> {
    /// Behavior consuming every message of `protocol` sent to the agent owning `acl`.
    pub fn new(
        acl: Arc<Acl>,
        protocol: impl Into<ProtocolId>,
        handlers: ProtocolHandlers,
        live: CancellationToken,
        inbox_capacity: usize,
        ctrl_capacity: usize,
    ) -> Self {
        let protocol = protocol.into();
        let label = format!("protocol behavior {} of agent {}", protocol, acl.agent_id());
        let inbox = Arc::new(Mailbox::new(inbox_capacity));
        let source = ProtocolSource {
            label: label.clone(),
            inbox: inbox.clone(),
            handlers,
        };
        let registration = ProtocolRegistration {
            acl,
            protocol,
            inbox,
        };
        Self::with_source(label, source, registration, live, ctrl_capacity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::audit::NoAudit;
    use crate::behavior::{handler, Behavior, BehaviorState};
    use crate::core::AddressLookup;
    use crate::core::Recipient;
    use crate::error::Error;
    use crate::protocol::Protocol;

    struct NoLookup;

    #[async_trait]
    impl AddressLookup for NoLookup {
        async fn lookup(&self, agent_id: u32) -> Result<Recipient> {
            Err(Error::ReceiverNotActive(agent_id))
        }
    }

    fn acl(agent_id: u32) -> Arc<Acl> {
        let lookup: Weak<dyn AddressLookup> = Weak::<NoLookup>::new();
        Arc::new(Acl::new(agent_id, 16, lookup, Arc::new(NoAudit)))
    }

    fn tagging(tag: &'static str, tx: mpsc::UnboundedSender<(&'static str, String)>) -> Handler<AclMessage> {
        handler(move |msg: AclMessage| {
            let tx = tx.clone();
            async move {
                tx.send((tag, msg.content))?;
                anyhow::Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_dispatch_by_performative() {
        let acl = acl(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = ProtocolHandlers::new(tagging("h2", tx.clone()))
            .on(Performative::Inform, tagging("h1", tx));
        let behavior = ProtocolBehavior::new(
            acl.clone(),
            Protocol::RequestWhen,
            handlers,
            CancellationToken::new(),
            16,
            10,
        );
        behavior.start().unwrap();

        for (perf, content) in [(Performative::Inform, "a"), (Performative::Propose, "b")] {
            let msg = AclMessage::new(2, 1, Protocol::RequestWhen, perf, content);
            acl.deliver_incoming(msg).await.unwrap();
        }
        let unknown = AclMessage::new(2, 1, Protocol::RequestWhen, 99, "c");
        acl.deliver_incoming(unknown).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(got);
        }
        assert_eq!(
            seen,
            vec![
                ("h1", "a".to_string()),
                ("h2", "b".to_string()),
                ("h2", "c".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_protocol_can_be_claimed_once() {
        let acl = acl(1);
        let noop = handler(|_msg: AclMessage| async { anyhow::Ok(()) });
        let first = ProtocolBehavior::new(
            acl.clone(),
            Protocol::Query,
            ProtocolHandlers::new(noop.clone()),
            CancellationToken::new(),
            16,
            10,
        );
        let second = ProtocolBehavior::new(
            acl.clone(),
            Protocol::Query,
            ProtocolHandlers::new(noop),
            CancellationToken::new(),
            16,
            10,
        );

        first.start().unwrap();
        assert!(matches!(second.start(), Err(Error::ProtocolAlreadyHandled(2))));
        assert_eq!(second.state(), BehaviorState::Created);

        first.stop();
        second.start().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_behavior_releases_protocol() {
        let acl = acl(1);
        let noop = handler(|_msg: AclMessage| async { anyhow::Ok(()) });
        let behavior = ProtocolBehavior::new(
            acl.clone(),
            Protocol::Query,
            ProtocolHandlers::new(noop),
            CancellationToken::new(),
            16,
            10,
        );
        behavior.start().unwrap();
        behavior.stop();

        let msg = AclMessage::new(2, 1, Protocol::Query, Performative::QueryIf, "q");
        acl.deliver_incoming(msg).await.unwrap();
        assert_eq!(acl.receive_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_loop_alive() {
        let acl = acl(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let failing = handler(|_msg: AclMessage| async { Err::<(), _>(anyhow::anyhow!("boom")) });
        let handlers = ProtocolHandlers::new(tagging("default", tx)).on(Performative::Failure, failing);
        let behavior = ProtocolBehavior::new(
            acl.clone(),
            Protocol::Request,
            handlers,
            CancellationToken::new(),
            16,
            10,
        );
        behavior.start().unwrap();

        acl.deliver_incoming(AclMessage::new(2, 1, Protocol::Request, Performative::Failure, "x"))
            .await
            .unwrap();
        acl.deliver_incoming(AclMessage::new(2, 1, Protocol::Request, Performative::Agree, "y"))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, ("default", "y".to_string()));
    }
}
