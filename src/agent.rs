//! Agents hosted by an agency.
//!
//! An [`Agent`] bundles its identity, its ACL and the local subsystems behaviors
//! attach to. The agency runs one [`AgentTask`] per agent; the task typically
//! starts behaviors and returns, or loops on its ACL until terminated.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::behavior::custom::CUSTOM_INBOX_CAPACITY;
use crate::behavior::{
    CustomChannel, CustomUpdateBehavior, Handler, PeriodicBehavior, ProtocolBehavior,
    ProtocolHandlers, TopicBehavior, TopicMessage, TopicRegistry,
};
use crate::core::Acl;
use crate::error::Result;
use crate::protocol::{AclMessage, AgencyName, AgentId, MalformedMessage, MasId, ProtocolId, Status, StatusCode};

/// Application-level description of an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    /// Free-form custom configuration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom: String,
}

/// Agency an agent lives on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub agency: AgencyName,
}

/// Everything the orchestrator and the agency know about an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    #[serde(default)]
    pub spec: AgentSpec,
    #[serde(rename = "masid", default)]
    pub mas_id: MasId,
    pub id: AgentId,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub status: Status,
}

/// Queue sizes for the behaviors of an agent.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorQueues {
    pub inbox_capacity: usize,
    pub ctrl_capacity: usize,
}

impl Default for BehaviorQueues {
    fn default() -> Self {
        Self {
            inbox_capacity: 1000,
            ctrl_capacity: crate::behavior::DEFAULT_CTRL_CAPACITY,
        }
    }
}

/// Application logic run once per agent.
pub type AgentTask = Handler<Arc<Agent>>;

/// A running agent.
pub struct Agent {
    info: RwLock<AgentInfo>,
    acl: Arc<Acl>,
    live: CancellationToken,
    topics: Arc<TopicRegistry>,
    custom: Arc<CustomChannel>,
    queues: BehaviorQueues,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Agent {
    pub fn new(info: AgentInfo, acl: Arc<Acl>, queues: BehaviorQueues) -> Self {
        Self {
            info: RwLock::new(info),
            acl,
            live: CancellationToken::new(),
            topics: Arc::new(TopicRegistry::new()),
            custom: Arc::new(CustomChannel::new()),
            queues,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AgentInfo> {
        self.info.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AgentInfo> {
        self.info.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> AgentId {
        self.acl.agent_id()
    }

    pub fn name(&self) -> String {
        self.read().spec.name.clone()
    }

    pub fn agent_type(&self) -> String {
        self.read().spec.agent_type.clone()
    }

    pub fn subtype(&self) -> String {
        self.read().spec.subtype.clone()
    }

    pub fn custom(&self) -> String {
        self.read().spec.custom.clone()
    }

    pub fn mas_id(&self) -> MasId {
        self.read().mas_id
    }

    pub fn info(&self) -> AgentInfo {
        self.read().clone()
    }

    pub fn status(&self) -> Status {
        self.read().status.clone()
    }

    pub(crate) fn set_status(&self, code: StatusCode) {
        self.write().status = Status::new(code);
    }

    pub fn acl(&self) -> &Arc<Acl> {
        &self.acl
    }

    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.topics
    }

    pub fn is_active(&self) -> bool {
        !self.live.is_cancelled()
    }

    /// Token cancelled when the agent terminates.
    pub fn liveness(&self) -> CancellationToken {
        self.live.clone()
    }

    pub fn new_message(
        &self,
        receiver: AgentId,
        protocol: impl Into<ProtocolId>,
        performative: impl Into<i32>,
        content: impl Into<String>,
    ) -> std::result::Result<AclMessage, MalformedMessage> {
        self.acl.new_message(receiver, protocol, performative, content)
    }

    pub async fn send(&self, msg: AclMessage) -> Result<()> {
        self.acl.send(msg).await
    }

    pub async fn receive_blocking(&self) -> Result<AclMessage> {
        self.acl.receive_blocking().await
    }

    pub fn receive_all(&self) -> Result<Vec<AclMessage>> {
        self.acl.receive_all()
    }

    pub fn protocol_behavior(
        &self,
        protocol: impl Into<ProtocolId>,
        handlers: ProtocolHandlers,
    ) -> ProtocolBehavior {
        ProtocolBehavior::new(
            self.acl.clone(),
            protocol,
            handlers,
            self.liveness(),
            self.queues.inbox_capacity,
            self.queues.ctrl_capacity,
        )
    }

    pub fn topic_behavior(&self, topic: impl Into<String>, handler: Handler<TopicMessage>) -> TopicBehavior {
        TopicBehavior::new(
            self.topics.clone(),
            topic,
            handler,
            self.liveness(),
            self.queues.inbox_capacity,
            self.queues.ctrl_capacity,
        )
    }

    pub fn periodic_behavior(&self, period: Duration, action: Handler<()>) -> PeriodicBehavior {
        PeriodicBehavior::new(
            format!("of agent {}", self.id()),
            period,
            action,
            self.liveness(),
            self.queues.ctrl_capacity,
        )
    }

    pub fn custom_update_behavior(&self, handler: Handler<String>) -> CustomUpdateBehavior {
        CustomUpdateBehavior::new(
            format!("of agent {}", self.id()),
            self.custom.clone(),
            handler,
            self.liveness(),
            CUSTOM_INBOX_CAPACITY,
            self.queues.ctrl_capacity,
        )
    }

    /// Store a new custom configuration and hand it to the update behavior, if any.
    pub async fn update_custom(&self, custom: String) -> Result<()> {
        self.write().spec.custom = custom.clone();
        if !self.custom.notify(custom).await? {
            tracing::debug!("Agent {} has no custom update behavior", self.id());
        }
        Ok(())
    }

    /// Stop the agent. Behaviors observe this and stop; calling it again does nothing.
    pub fn terminate(&self) {
        if self.live.is_cancelled() {
            return;
        }
        self.live.cancel();
        self.acl.close();
        self.topics.close();
        self.custom.deregister();
        self.set_status(StatusCode::Terminated);
        tracing::info!("Terminated agent {}", self.id());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use tokio::sync::mpsc;

    use super::*;
    use crate::audit::NoAudit;
    use crate::behavior::{handler, Behavior, BehaviorState};
    use crate::core::{AddressLookup, AgencyRouter};
    use crate::protocol::{Performative, Protocol};

    fn agent(id: AgentId) -> Agent {
        let lookup: Weak<dyn AddressLookup> = Weak::<AgencyRouter>::new();
        let acl = Arc::new(Acl::new(id, 16, lookup, Arc::new(NoAudit)));
        let info = AgentInfo {
            id,
            spec: AgentSpec {
                name: "meter".to_string(),
                agent_type: "sensor".to_string(),
                ..AgentSpec::default()
            },
            ..AgentInfo::default()
        };
        Agent::new(info, acl, BehaviorQueues::default())
    }

    #[test]
    fn test_agent_info_wire_format() {
        let raw = r#"{"spec":{"name":"meter","type":"sensor","custom":"{}"},"masid":3,"id":7}"#;
        let info: AgentInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.spec.agent_type, "sensor");
        assert_eq!(info.mas_id, 3);
        assert_eq!(info.status.code, StatusCode::Starting);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["spec"]["type"], "sensor");
        assert!(json["spec"].get("subtype").is_none());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let agent = agent(1);
        assert_eq!(agent.name(), "meter");
        agent.terminate();
        agent.terminate();

        assert!(!agent.is_active());
        assert!(!agent.acl().is_active());
        assert_eq!(agent.status().code, StatusCode::Terminated);
        assert!(agent.receive_all().is_err());
    }

    #[tokio::test]
    async fn test_terminate_stops_behaviors() {
        let agent = agent(1);
        let noop = handler(|_msg: AclMessage| async { anyhow::Ok(()) });
        let behavior = agent.protocol_behavior(Protocol::Request, ProtocolHandlers::new(noop));
        behavior.start().unwrap();

        agent.terminate();
        tokio::time::timeout(Duration::from_secs(1), async {
            while behavior.state() != BehaviorState::Stopped {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_custom_update() {
        let agent = agent(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let behavior = agent.custom_update_behavior(handler(move |custom: String| {
            let tx = tx.clone();
            async move {
                tx.send(custom)?;
                anyhow::Ok(())
            }
        }));

        agent.update_custom("v1".to_string()).await.unwrap();
        behavior.start().unwrap();
        agent.update_custom("v2".to_string()).await.unwrap();

        assert_eq!(agent.custom(), "v2");
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_messages_through_agent() {
        let agent = agent(4);
        let msg = agent
            .new_message(4, Protocol::None, Performative::Inform, "self")
            .unwrap();
        agent.acl().deliver_incoming(msg).await.unwrap();
        assert_eq!(agent.receive_blocking().await.unwrap().content, "self");
    }
}
