//! Periodic behavior: runs an action at a fixed interval.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{invoke, BehaviorRunner, EventSource, Handler, Unregistered};

pub struct PeriodicSource {
    label: String,
    period: Duration,
    interval: Option<Interval>,
    action: Handler<()>,
}

#[async_trait]
impl EventSource for PeriodicSource {
    type Event = ();

    async fn next_event(&mut self) -> Option<()> {
        // the first run happens one period after start
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
        Some(())
    }

    async fn handle(&mut self, _tick: ()) {
        invoke(&self.label, &self.action, ()).await;
    }
}

pub type PeriodicBehavior = BehaviorRunner<PeriodicSource>;

impl BehaviorRunner<PeriodicSource> {
    pub fn new(
        label: impl Into<String>,
        period: Duration,
        action: Handler<()>,
        live: CancellationToken,
        ctrl_capacity: usize,
    ) -> Self {
        let label = format!("periodic behavior {}", label.into());
        let source = PeriodicSource {
            label: label.clone(),
            period: period.max(Duration::from_millis(1)),
            interval: None,
            action,
        };
        Self::with_source(label, source, Unregistered, live, ctrl_capacity)
    }
}
