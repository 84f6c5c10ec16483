use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::time::Instant;

use crate::metrics::{MetricsAggregator, Sample};
use crate::probe::EndpointProbe;
use crate::report::human_duration;

/// Polls one endpoint's latest block until a deadline.
pub struct PollingWorker {
    name: String,
    probe: Arc<dyn EndpointProbe>,
    metrics: Arc<MetricsAggregator>,
    interval: Duration,
    deadline: Instant,
}

impl PollingWorker {
    pub fn new(
        name: impl Into<String>,
        probe: Arc<dyn EndpointProbe>,
        metrics: Arc<MetricsAggregator>,
        interval: Duration,
        deadline: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            probe,
            metrics,
            interval,
            deadline,
        }
    }

    /// Run until the deadline. A failed poll is logged and skipped.
    ///
    /// Returns the number of successful polls.
    pub async fn run(self) -> u64 {
        if let Some(meta) = self.metrics.metadata(&self.name) {
            debug!("[{}] polling {} ({})", self.name, meta.chain_name, meta.client_version);
        }

        let mut recorded = 0;
        while Instant::now() < self.deadline {
            match self.poll_once().await {
                Ok(sample) => {
                    debug!(
                        "[{}] block={} latency={:.2}ms lag={}",
                        self.name,
                        sample.block_number,
                        sample.latency.as_secs_f64() * 1000.0,
                        human_duration(sample.lag_secs as f64)
                    );
                    recorded += 1;
                }
                Err(e) => warn!("[{}] RPC polling failed: {}", self.name, e),
            }

            tokio::time::sleep(self.interval).await;
        }

        debug!(
            "[{}] done: avg latency {:.2}ms, avg lag {:.1}s, latest block {:?}",
            self.name,
            self.metrics.average_latency(&self.name).as_secs_f64() * 1000.0,
            self.metrics.average_lag_secs(&self.name),
            self.metrics.latest_block(&self.name)
        );
        recorded
    }

    async fn poll_once(&self) -> Result<Sample, crate::error::ProbeError> {
        let started = std::time::Instant::now();
        let block = self.probe.latest_block().await?;
        let latency = started.elapsed();
        let received_at = Utc::now();

        let lag = received_at.timestamp().saturating_sub(block.timestamp).max(0);
        let sample = Sample {
            sampled_at: received_at,
            latency,
            lag_secs: lag as u64,
            block_number: block.number,
        };
        self.metrics.record(&self.name, sample);
        Ok(sample)
    }
}
