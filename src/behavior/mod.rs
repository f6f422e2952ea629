//! Agent behaviors.
//!
//! A behavior is a consumer loop running next to the agent's task. Every flavor
//! shares the same life cycle:
//! - `Created`: built, nothing registered yet
//! - `Running`: inbox registered, loop task running
//! - `Stopped`: terminal; the inbox is deregistered and the loop exits on its next wake-up
//!
//! The loop also stops on its own once the owning agent terminates.

pub mod custom;
pub mod periodic;
pub mod protocol;
pub mod topic;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use custom::{CustomChannel, CustomUpdateBehavior};
pub use periodic::PeriodicBehavior;
pub use protocol::{ProtocolBehavior, ProtocolHandlers};
pub use topic::{TopicBehavior, TopicMessage, TopicRegistry};

/// Default capacity of behavior control channels.
pub const DEFAULT_CTRL_CAPACITY: usize = 10;

/// Asynchronous event handler.
pub type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Life cycle state of a behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    Created,
    Running,
    Stopped,
}

/// A startable, stoppable consumer loop.
pub trait Behavior: Send + Sync {
    /// Register the inbox and launch the loop. Fails unless the behavior is `Created`.
    fn start(&self) -> Result<()>;

    /// Deregister the inbox and signal the loop to exit. Idempotent.
    fn stop(&self);

    fn state(&self) -> BehaviorState;
}

/// Signals on a behavior's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
}

/// Source of the work a behavior loop consumes.
#[async_trait]
pub trait EventSource: Send + 'static {
    type Event: Send;

    /// Wait for the next event. Must be cancel safe. `None` ends the behavior.
    async fn next_event(&mut self) -> Option<Self::Event>;

    async fn handle(&mut self, event: Self::Event);
}

/// Hooks attaching a behavior's inbox to the subsystem feeding it.
pub trait Registration: Send + Sync {
    fn register(&self) -> Result<()>;
    fn deregister(&self);
}

/// Registration for behaviors that are not fed by anyone.
pub struct Unregistered;

impl Registration for Unregistered {
    fn register(&self) -> Result<()> {
        Ok(())
    }

    fn deregister(&self) {}
}

struct Shared {
    label: String,
    state: Mutex<BehaviorState>,
    ctrl: mpsc::Sender<Control>,
    registration: Box<dyn Registration>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BehaviorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state(), BehaviorState::Stopped);
        if previous == BehaviorState::Running {
            tracing::info!("{} stops", self.label);
            self.registration.deregister();
            if self.ctrl.try_send(Control::Stop).is_err() {
                tracing::warn!("{}: control channel full", self.label);
            }
        }
    }
}

struct Pending<S> {
    source: S,
    ctrl: mpsc::Receiver<Control>,
}

/// Generic behavior driving an [`EventSource`].
pub struct BehaviorRunner<S: EventSource> {
    shared: Arc<Shared>,
    pending: Mutex<Option<Pending<S>>>,
    live: CancellationToken,
}

impl<S: EventSource> BehaviorRunner<S> {
    /// Build a behavior that runs until stopped or until `live` is cancelled.
    pub fn with_source(
        label: impl Into<String>,
        source: S,
        registration: impl Registration + 'static,
        live: CancellationToken,
        ctrl_capacity: usize,
    ) -> Self {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(ctrl_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                state: Mutex::new(BehaviorState::Created),
                ctrl: ctrl_tx,
                registration: Box::new(registration),
            }),
            pending: Mutex::new(Some(Pending {
                source,
                ctrl: ctrl_rx,
            })),
            live,
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<S: EventSource> Behavior for BehaviorRunner<S> {
    fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            match *state {
                BehaviorState::Created => {}
                BehaviorState::Running => {
                    return Err(Error::Behavior(format!("{} already running", self.shared.label)))
                }
                BehaviorState::Stopped => return Err(Error::inactive(self.shared.label.clone())),
            }
            self.shared.registration.register()?;
            *state = BehaviorState::Running;
        }

        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| Error::Behavior(format!("{} already started", self.shared.label)))?;
        tracing::info!("{} starts", self.shared.label);
        tokio::spawn(run_loop(
            self.shared.clone(),
            pending.source,
            pending.ctrl,
            self.live.clone(),
        ));
        Ok(())
    }

    fn stop(&self) {
        self.shared.stop();
    }

    fn state(&self) -> BehaviorState {
        *self.shared.state()
    }
}

async fn run_loop<S: EventSource>(
    shared: Arc<Shared>,
    mut source: S,
    mut ctrl: mpsc::Receiver<Control>,
    live: CancellationToken,
) {
    loop {
        if live.is_cancelled() {
            shared.stop();
        }
        let event = tokio::select! {
            biased;
            cmd = ctrl.recv() => match cmd {
                Some(Control::Stop) | None => break,
            },
            _ = live.cancelled() => continue,
            event = source.next_event() => match event {
                Some(event) => event,
                None => {
                    shared.stop();
                    continue;
                }
            },
        };

        let started = Instant::now();
        source.handle(event).await;
        tracing::trace!("{} handled event in {:?}", shared.label, started.elapsed());
    }
    tracing::info!("Terminating {}", shared.label);
}

/// Run a handler and log its failure.
pub(crate) async fn invoke<T>(label: &str, handler: &Handler<T>, event: T) {
    if let Err(e) = handler(event).await {
        tracing::warn!("{} handler failed: {:#}", label, e);
    }
}
