//! Agent address resolution against the placement registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::{AgencyName, AgentId, MasId};

/// Identity of the running agency, injected wherever its own name matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyContext {
    pub name: AgencyName,
    pub mas_id: MasId,
}

impl AgencyContext {
    pub fn new(name: impl Into<AgencyName>, mas_id: MasId) -> Self {
        Self {
            name: name.into(),
            mas_id,
        }
    }
}

/// External collaborator that knows which agency hosts an agent.
#[async_trait]
pub trait PlacementRegistry: Send + Sync {
    /// Agency currently hosting the agent, empty if it runs nowhere.
    async fn resolve_agent_address(&self, mas_id: MasId, agent_id: AgentId) -> Result<AgencyName>;
}

/// Resolves agents the agency does not know yet.
///
/// The router checks its local and remote agent tables first and only asks the
/// resolver on a miss, so every call here is a registry round trip.
pub struct AddressResolver {
    context: AgencyContext,
    registry: Arc<dyn PlacementRegistry>,
}

impl AddressResolver {
    pub fn new(context: AgencyContext, registry: Arc<dyn PlacementRegistry>) -> Self {
        Self { context, registry }
    }

    pub fn context(&self) -> &AgencyContext {
        &self.context
    }

    /// Name of the remote agency hosting `agent_id`.
    pub async fn resolve_remote(&self, agent_id: AgentId) -> Result<AgencyName> {
        let agency = self
            .registry
            .resolve_agent_address(self.context.mas_id, agent_id)
            .await?;
        tracing::info!("Requested address of unknown agent {}: {:?}", agent_id, agency);

        if agency == self.context.name {
            return Err(Error::AddressingInconsistency {
                agent: agent_id,
                agency,
            });
        }
        if agency.is_empty() {
            return Err(Error::ReceiverNotActive(agent_id));
        }
        Ok(agency)
    }
}
