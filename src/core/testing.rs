//! Test doubles for the registry and the network boundary.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;

use super::link::AgencyTransport;
use super::resolver::PlacementRegistry;
use crate::audit::AuditSink;
use crate::error::{Error, Result};
use crate::protocol::{AclMessage, AgencyName, AgentId, MasId};

/// Placement registry backed by a map, counting lookups.
#[derive(Default)]
pub struct MockRegistry {
    placements: DashMap<AgentId, AgencyName>,
    calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, agent: AgentId, agency: &str) {
        self.placements.insert(agent, agency.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlacementRegistry for MockRegistry {
    async fn resolve_agent_address(&self, _mas_id: MasId, agent_id: AgentId) -> Result<AgencyName> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .placements
            .get(&agent_id)
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }
}

/// Transport that records what would have gone over the wire.
#[derive(Default)]
pub struct MockTransport {
    batches: Mutex<Vec<Vec<AclMessage>>>,
    returns: Mutex<Vec<(AgencyName, AclMessage)>>,
    unresolvable: Mutex<HashSet<AgencyName>>,
    post_attempts: AtomicUsize,
    resolve_calls: AtomicUsize,
    failing_posts: AtomicUsize,
    fail_returns: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` posts with a server error.
    pub fn fail_next_posts(&self, n: usize) {
        self.failing_posts.store(n, Ordering::SeqCst);
    }

    pub fn fail_returns(&self, fail: bool) {
        self.fail_returns.store(fail, Ordering::SeqCst);
    }

    pub fn set_unresolvable(&self, agency: &str) {
        self.unresolvable.lock().unwrap().insert(agency.to_string());
    }

    pub fn set_resolvable(&self, agency: &str) {
        self.unresolvable.lock().unwrap().remove(agency);
    }

    /// Successfully posted batches, in order.
    pub fn batches(&self) -> Vec<Vec<AclMessage>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn returns(&self) -> Vec<(AgencyName, AclMessage)> {
        self.returns.lock().unwrap().clone()
    }

    pub fn post_attempts(&self) -> usize {
        self.post_attempts.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    /// Wait until at least `n` messages were posted successfully.
    pub async fn wait_for_messages(&self, n: usize, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.delivered() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not posted in time");
    }

    /// Wait until at least `n` undeliverable messages were returned.
    pub async fn wait_for_returns(&self, n: usize, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.returns.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not returned in time");
    }
}

#[async_trait]
impl AgencyTransport for MockTransport {
    async fn resolve_host(&self, agency: &str) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unresolvable.lock().unwrap().contains(agency) {
            return Err(Error::Transport(format!("no such host {}", agency)));
        }
        Ok(format!("{}.host", agency))
    }

    async fn post_msgs(&self, _host: &str, msgs: &[AclMessage]) -> Result<StatusCode> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_posts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Ok(StatusCode::INTERNAL_SERVER_ERROR);
        }
        self.batches.lock().unwrap().push(msgs.to_vec());
        Ok(StatusCode::CREATED)
    }

    async fn return_undeliverable(&self, agency: &str, msg: &AclMessage) -> Result<StatusCode> {
        if self.fail_returns.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("{} unreachable", agency)));
        }
        self.returns
            .lock()
            .unwrap()
            .push((agency.to_string(), msg.clone()));
        Ok(StatusCode::CREATED)
    }
}

/// Audit sink keeping every record in memory.
#[derive(Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<(String, AclMessage)>>,
}

impl MemoryAudit {
    pub fn events(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: &str, msg: &AclMessage) {
        self.records
            .lock()
            .unwrap()
            .push((event.to_string(), msg.clone()));
    }
}
