//! Client for the HTTP API of peer agencies.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::retry::{with_retries, RetryPolicy};
use super::check;
use crate::agency::AgencyInfo;
use crate::agent::AgentInfo;
use crate::core::AgencyTransport;
use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgentId, Status};

pub struct AgencyClient {
    client: Client,
    port: u16,
    retry: RetryPolicy,
    dns_retries: u32,
}

impl AgencyClient {
    /// Client for agencies listening on `port`.
    pub fn new(port: u16, timeout: Duration, retry: RetryPolicy, dns_retries: u32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            port,
            retry,
            dns_retries: dns_retries.max(1),
        })
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("http://{}:{}/api/agency{}", host, self.port, path)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<StatusCode> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(resp.status())
    }

    pub async fn get_info(&self, host: &str) -> Result<AgencyInfo> {
        let url = self.url(host, "");
        let url = url.as_str();
        with_retries("agency info", &self.retry, || async move {
            let resp = check(self.client.get(url).send().await?).await?;
            Ok::<_, Error>(resp.json::<AgencyInfo>().await?)
        })
        .await
    }

    /// Create an agent on the agency at `host`.
    pub async fn post_agent(&self, host: &str, agent: &AgentInfo) -> Result<()> {
        let url = self.url(host, "/agents");
        let url = url.as_str();
        with_retries("agent creation", &self.retry, || async move {
            check(self.client.post(url).json(agent).send().await?).await?;
            Ok::<_, Error>(())
        })
        .await
    }

    pub async fn delete_agent(&self, host: &str, agent_id: AgentId) -> Result<()> {
        let url = self.url(host, &format!("/agents/{}", agent_id));
        let url = url.as_str();
        with_retries("agent removal", &self.retry, || async move {
            check(self.client.delete(url).send().await?).await?;
            Ok::<_, Error>(())
        })
        .await
    }

    pub async fn agent_status(&self, host: &str, agent_id: AgentId) -> Result<Status> {
        let url = self.url(host, &format!("/agents/{}/status", agent_id));
        let url = url.as_str();
        with_retries("agent status", &self.retry, || async move {
            let resp = check(self.client.get(url).send().await?).await?;
            Ok::<_, Error>(resp.json::<Status>().await?)
        })
        .await
    }

    pub async fn put_custom(&self, host: &str, agent_id: AgentId, custom: &str) -> Result<()> {
        let url = self.url(host, &format!("/agents/{}/custom", agent_id));
        let url = url.as_str();
        with_retries("custom update", &self.retry, || async move {
            check(self.client.put(url).body(custom.to_string()).send().await?).await?;
            Ok::<_, Error>(())
        })
        .await
    }

    /// Post a batch without the transport-level retries the link does on its own.
    pub async fn send_msgs(&self, host: &str, msgs: &[AclMessage]) -> Result<()> {
        let url = self.url(host, "/msgs");
        check(self.client.post(&url).json(msgs).send().await?).await?;
        Ok(())
    }
}

fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

#[async_trait]
impl AgencyTransport for AgencyClient {
    async fn resolve_host(&self, agency: &str) -> Result<String> {
        let mut last_error = String::from("no address");
        for attempt in 1..=self.dns_retries {
            match tokio::net::lookup_host((agency, self.port)).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        return Ok(url_host(addr.ip()));
                    }
                    last_error = "no address".to_string();
                }
                Err(e) => last_error = e.to_string(),
            }
            tracing::debug!(
                "Resolving agency {} failed ({}/{}): {}",
                agency,
                attempt,
                self.dns_retries,
                last_error
            );
            if attempt < self.dns_retries {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
        Err(Error::Transport(format!(
            "could not resolve agency {}: {}",
            agency, last_error
        )))
    }

    async fn post_msgs(&self, host: &str, msgs: &[AclMessage]) -> Result<StatusCode> {
        self.post_json(&self.url(host, "/msgs"), msgs).await
    }

    async fn return_undeliverable(&self, agency: &str, msg: &AclMessage) -> Result<StatusCode> {
        let host = self.resolve_host(agency).await?;
        let url = self.url(&host, "/msgundeliv");
        with_retries("undeliverable return", &self.retry, || self.post_json(&url, msg)).await
    }
}
