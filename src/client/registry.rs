//! Client for the placement registry of the MAS orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::check;
use super::retry::{with_retries, RetryPolicy};
use crate::agent::Address;
use crate::core::PlacementRegistry;
use crate::error::{Error, Result};
use crate::protocol::{AgencyName, AgentId, MasId};

pub struct RegistryClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RegistryClient {
    pub fn new(host: &str, port: u16, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}/api/clonemap", host, port),
            retry,
        })
    }

    fn address_url(&self, mas_id: MasId, agent_id: AgentId) -> String {
        format!("{}/mas/{}/agents/{}/address", self.base_url, mas_id, agent_id)
    }
}

#[async_trait]
impl PlacementRegistry for RegistryClient {
    async fn resolve_agent_address(&self, mas_id: MasId, agent_id: AgentId) -> Result<AgencyName> {
        let url = self.address_url(mas_id, agent_id);
        let url = url.as_str();
        let address = with_retries("address lookup", &self.retry, || async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(Address::default());
            }
            let resp = check(resp).await?;
            Ok::<_, Error>(resp.json::<Address>().await?)
        })
        .await
        .map_err(|e| Error::Registry(format!("address of agent {}: {}", agent_id, e)))?;
        Ok(address.agency)
    }
}
