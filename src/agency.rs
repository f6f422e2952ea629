//! The agency: hosts agents and owns the routing substrate.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentInfo, AgentTask, BehaviorQueues};
use crate::core::{AgencyContext, AgencyRouter};
use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgencyName, AgentId, MasId, Status, StatusCode};

/// Static description of an agency plus the agents it hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencySpec {
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    pub name: AgencyName,
    pub id: u32,
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

/// Body of `GET /api/agency`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencyInfo {
    pub spec: AgencySpec,
    pub status: Status,
}

pub struct Agency {
    id: u32,
    router: Arc<AgencyRouter>,
    agents: DashMap<AgentId, Arc<Agent>>,
    task: AgentTask,
    queues: BehaviorQueues,
    status: RwLock<Status>,
}

impl Agency {
    pub fn new(id: u32, router: Arc<AgencyRouter>, task: AgentTask, queues: BehaviorQueues) -> Self {
        tracing::info!(
            "Agency {} of MAS {} ready",
            router.context().name,
            router.context().mas_id
        );
        Self {
            id,
            router,
            agents: DashMap::new(),
            task,
            queues,
            status: RwLock::new(Status::new(StatusCode::Running)),
        }
    }

    pub fn context(&self) -> &AgencyContext {
        self.router.context()
    }

    pub fn router(&self) -> &Arc<AgencyRouter> {
        &self.router
    }

    /// Register a new agent and start its task.
    pub fn create_agent(&self, mut info: AgentInfo) -> Result<Arc<Agent>> {
        let acl = self.router.register_agent(info.id)?;
        info.address.agency = self.context().name.clone();
        info.status = Status::new(StatusCode::Starting);

        let agent = Arc::new(Agent::new(info, acl, self.queues));
        self.agents.insert(agent.id(), agent.clone());
        tracing::info!("Created agent {} ({})", agent.id(), agent.name());

        agent.set_status(StatusCode::Running);
        let task = (self.task)(agent.clone());
        let supervised = agent.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(task).await;
            let id = supervised.id();
            let failure = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!("Task of agent {} finished", id);
                    None
                }
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(e) => Some(e.to_string()),
            };
            if let Some(failure) = failure {
                if supervised.is_active() {
                    tracing::error!("Task of agent {} failed: {}", id, failure);
                    supervised.set_status(StatusCode::Error);
                } else {
                    tracing::debug!("Task of terminated agent {} ended: {}", id, failure);
                }
            }
        });
        Ok(agent)
    }

    /// Terminate and forget a local agent.
    pub fn remove_agent(&self, agent_id: AgentId) -> Result<()> {
        let (_, agent) = self
            .agents
            .remove(&agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent_id)))?;
        agent.terminate();
        self.router.deregister_agent(agent_id);
        tracing::info!("Removed agent {}", agent_id);
        Ok(())
    }

    pub fn agent(&self, agent_id: AgentId) -> Option<Arc<Agent>> {
        self.agents.get(&agent_id).map(|a| a.value().clone())
    }

    pub fn agent_status(&self, agent_id: AgentId) -> Result<Status> {
        self.agent(agent_id)
            .map(|a| a.status())
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent_id)))
    }

    pub async fn update_agent_custom(&self, agent_id: AgentId, custom: String) -> Result<()> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {}", agent_id)))?;
        agent.update_custom(custom).await
    }

    /// Hand a batch from a peer agency to the receive workers.
    pub async fn accept_msgs(&self, batch: Vec<AclMessage>) -> Result<()> {
        self.router.accept_inbound(batch).await
    }

    pub async fn resend_undeliverable(&self, msg: AclMessage) {
        self.router.resend_undeliverable(msg).await
    }

    pub fn info(&self) -> AgencyInfo {
        let mut agents: Vec<AgentInfo> = self.agents.iter().map(|a| a.value().info()).collect();
        agents.sort_by_key(|a| a.id);
        let context = self.context();
        AgencyInfo {
            spec: AgencySpec {
                mas_id: context.mas_id,
                name: context.name.clone(),
                id: self.id,
                agents,
            },
            status: self
                .status
                .read()
                .map(|s| s.clone())
                .unwrap_or_else(|poisoned| poisoned.into_inner().clone()),
        }
    }

    /// Terminate every agent and stop the router.
    pub fn terminate_all(&self) {
        let ids: Vec<AgentId> = self.agents.iter().map(|a| *a.key()).collect();
        for id in ids {
            if let Err(e) = self.remove_agent(id) {
                tracing::debug!("Removing agent {}: {}", id, e);
            }
        }
        self.router.shutdown();
        if let Ok(mut status) = self.status.write() {
            *status = Status::new(StatusCode::Terminated);
        }
        tracing::info!("Agency {} terminated", self.context().name);
    }
}
