//! Custom configuration updates pushed to a running agent.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{invoke, BehaviorRunner, EventSource, Handler, Registration};
use crate::error::{Error, Result};

/// Capacity of the custom configuration inbox.
pub const CUSTOM_INBOX_CAPACITY: usize = 10;

/// Slot for the single inbox receiving an agent's custom configuration updates.
#[derive(Debug, Default)]
pub struct CustomChannel {
    inbox: Mutex<Option<mpsc::Sender<String>>>,
}

impl CustomChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, inbox: mpsc::Sender<String>) -> Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(Error::AlreadyHandled("custom configuration updates".to_string()));
        }
        *slot = Some(inbox);
        Ok(())
    }

    pub fn deregister(&self) {
        self.slot().take();
    }

    pub fn is_registered(&self) -> bool {
        self.slot().is_some()
    }

    /// Forward an update to the registered inbox. Returns whether one was registered.
    pub async fn notify(&self, custom: String) -> Result<bool> {
        let inbox = self.slot().clone();
        match inbox {
            Some(inbox) => {
                inbox
                    .send(custom)
                    .await
                    .map_err(|_| Error::inactive("custom update behavior"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub struct CustomSource {
    label: String,
    inbox: mpsc::Receiver<String>,
    handler: Handler<String>,
}

#[async_trait]
impl EventSource for CustomSource {
    type Event = String;

    async fn next_event(&mut self) -> Option<String> {
        self.inbox.recv().await
    }

    async fn handle(&mut self, custom: String) {
        invoke(&self.label, &self.handler, custom).await;
    }
}

struct CustomRegistration {
    channel: Arc<CustomChannel>,
    inbox: mpsc::Sender<String>,
}

impl Registration for CustomRegistration {
    fn register(&self) -> Result<()> {
        self.channel.register(self.inbox.clone())
    }

    fn deregister(&self) {
        self.channel.deregister();
    }
}

pub type CustomUpdateBehavior = BehaviorRunner<CustomSource>;

impl BehaviorRunner<CustomSource> {
    pub fn new(
        label: impl Into<String>,
        channel: Arc<CustomChannel>,
        handler: Handler<String>,
        live: CancellationToken,
        inbox_capacity: usize,
        ctrl_capacity: usize,
    ) -> Self {
        let label = format!("custom update behavior {}", label.into());
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let source = CustomSource {
            label: label.clone(),
            inbox: rx,
            handler,
        };
        let registration = CustomRegistration { channel, inbox: tx };
        Self::with_source(label, source, registration, live, ctrl_capacity)
    }
}
