//! Periodic metrics snapshots for remote pipelines.

use edge_runtime::{CancellationToken, MetricRegistry};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Latest published snapshot, as the JSON string status events carry.
pub type PublishedMetrics = Arc<Mutex<Option<String>>>;

pub(crate) struct MetricsPublisher {
    stop: CancellationToken,
    thread: JoinHandle<()>,
}

impl MetricsPublisher {
    pub(crate) fn start(
        pipeline_id: &str,
        metrics: MetricRegistry,
        slot: PublishedMetrics,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let id = pipeline_id.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("metrics-{}", pipeline_id))
            .spawn(move || loop {
                publish(&id, &metrics, &slot);
                if !token.sleep(interval) {
                    publish(&id, &metrics, &slot);
                    break;
                }
            })?;
        Ok(Self { stop, thread })
    }

    pub(crate) fn stop(self) {
        self.stop.cancel();
        if self.thread.join().is_err() {
            warn!("Metrics publisher thread panicked");
        }
    }
}

fn publish(pipeline_id: &str, metrics: &MetricRegistry, slot: &PublishedMetrics) {
    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => {
            debug!(pipeline = %pipeline_id, "Metrics published");
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        }
        Err(err) => warn!(pipeline = %pipeline_id, error = %err, "Failed to serialize metrics"),
    }
}
