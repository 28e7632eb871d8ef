//! Periodic flow expiry

use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Flow timeouts have one-second granularity
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Run [`Pipeline::timeout`] every `period` on the current tokio runtime
///
/// The task runs until aborted through the returned handle.
pub fn spawn_timeout_sweep(pipeline: Arc<Pipeline>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(period_ms = period.as_millis() as u64, "timeout sweep started");

        loop {
            ticker.tick().await;
            pipeline.timeout();
        }
    })
}
