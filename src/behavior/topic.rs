//! Topic subscriptions local to one agent.
//!
//! The registry maps a topic to the inbox of the behavior subscribed to it. Only
//! in-process publishing is supported.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{invoke, BehaviorRunner, EventSource, Handler, Registration};
use crate::error::{Error, Result};

/// A message published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: String,
    pub published: DateTime<Utc>,
}

/// Per-agent topic table.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: DashMap<String, mpsc::Sender<TopicMessage>>,
    closed: CancellationToken,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an inbox to a topic. Fails if the topic already has one.
    pub fn subscribe(&self, topic: &str, inbox: mpsc::Sender<TopicMessage>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::inactive("topic registry"));
        }
        match self.topics.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyHandled(format!("topic {}", topic))),
            Entry::Vacant(slot) => {
                slot.insert(inbox);
                Ok(())
            }
        }
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.topics
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic)))
    }

    /// Publish to a topic. Returns whether anyone was subscribed.
    pub async fn publish(&self, topic: &str, payload: impl Into<String>) -> Result<bool> {
        if self.closed.is_cancelled() {
            return Err(Error::inactive("topic registry"));
        }
        let Some(inbox) = self.topics.get(topic).map(|t| t.value().clone()) else {
            return Ok(false);
        };
        let msg = TopicMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            published: Utc::now(),
        };
        inbox
            .send(msg)
            .await
            .map_err(|_| Error::inactive(format!("topic {}", topic)))?;
        Ok(true)
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.key().clone()).collect()
    }

    pub fn close(&self) {
        self.closed.cancel();
        self.topics.clear();
    }
}

pub struct TopicSource {
    label: String,
    inbox: mpsc::Receiver<TopicMessage>,
    handler: Handler<TopicMessage>,
}

#[async_trait]
impl EventSource for TopicSource {
    type Event = TopicMessage;

    async fn next_event(&mut self) -> Option<TopicMessage> {
        self.inbox.recv().await
    }

    async fn handle(&mut self, msg: TopicMessage) {
        invoke(&self.label, &self.handler, msg).await;
    }
}

struct TopicRegistration {
    registry: Arc<TopicRegistry>,
    topic: String,
    inbox: mpsc::Sender<TopicMessage>,
}

impl Registration for TopicRegistration {
    fn register(&self) -> Result<()> {
        self.registry.subscribe(&self.topic, self.inbox.clone())
    }

    fn deregister(&self) {
        if let Err(e) = self.registry.unsubscribe(&self.topic) {
            tracing::debug!("Unsubscribing topic {}: {}", self.topic, e);
        }
    }
}

pub type TopicBehavior = BehaviorRunner<TopicSource>;

impl BehaviorRunner<TopicSource> {
    pub fn new(
        registry: Arc<TopicRegistry>,
        topic: impl Into<String>,
        handler: Handler<TopicMessage>,
        live: CancellationToken,
        inbox_capacity: usize,
        ctrl_capacity: usize,
    ) -> Self {
        let topic = topic.into();
        let label = format!("topic behavior {}", topic);
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let source = TopicSource {
            label: label.clone(),
            inbox: rx,
            handler,
        };
        let registration = TopicRegistration {
            registry,
            topic,
            inbox: tx,
        };
        Self::with_source(label, source, registration, live, ctrl_capacity)
    }
}
