use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Default number of samples kept per endpoint for trend estimation.
pub const DEFAULT_HISTORY_CAP: usize = 10_000;

/// One poll observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Wall clock when the response arrived
    pub sampled_at: DateTime<Utc>,
    pub latency: Duration,
    /// Seconds between `sampled_at` and the block timestamp, clamped at zero
    pub lag_secs: u64,
    pub block_number: u64,
}

/// Metadata resolved once per endpoint before polling starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMetadata {
    pub client_version: String,
    pub chain_id: Option<u64>,
    pub network_id: Option<u64>,
    pub chain_name: String,
}

/// Running state for one endpoint.
///
/// Averages always come from the running totals; `history` is bounded and
/// only feeds the ETA estimator.
#[derive(Debug, Clone, Default)]
pub struct EndpointMetrics {
    pub total_elapsed: Duration,
    pub total_requests: u64,
    pub total_lag_secs: u64,
    pub total_blocks: u64,
    pub history: VecDeque<Sample>,
    pub latest_block: Option<u64>,
    pub metadata: EndpointMetadata,
}

impl EndpointMetrics {
    fn push(&mut self, sample: Sample, cap: usize) {
        self.total_elapsed += sample.latency;
        self.total_requests += 1;
        self.total_lag_secs += sample.lag_secs;
        self.total_blocks += 1;
        self.latest_block = Some(sample.block_number);

        if cap == 0 {
            return;
        }
        while self.history.len() >= cap {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn average_latency(&self) -> Duration {
        if self.total_requests == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_elapsed.as_nanos() / u128::from(self.total_requests);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn average_lag_secs(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.total_lag_secs as f64 / self.total_blocks as f64
    }
}

/// Thread-safe per-endpoint accumulator shared by all polling workers.
///
/// Every operation takes the single lock for O(1) work; readers get copies.
#[derive(Debug)]
pub struct MetricsAggregator {
    history_cap: usize,
    endpoints: Mutex<HashMap<String, EndpointMetrics>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl MetricsAggregator {
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, endpoint: &str, sample: Sample) {
        let mut endpoints = self.endpoints.lock();
        endpoints
            .entry(endpoint.to_string())
            .or_default()
            .push(sample, self.history_cap);
    }

    pub fn set_metadata(&self, endpoint: &str, metadata: EndpointMetadata) {
        let mut endpoints = self.endpoints.lock();
        endpoints.entry(endpoint.to_string()).or_default().metadata = metadata;
    }

    pub fn average_latency(&self, endpoint: &str) -> Duration {
        self.endpoints
            .lock()
            .get(endpoint)
            .map(EndpointMetrics::average_latency)
            .unwrap_or_default()
    }

    pub fn average_lag_secs(&self, endpoint: &str) -> f64 {
        self.endpoints
            .lock()
            .get(endpoint)
            .map(EndpointMetrics::average_lag_secs)
            .unwrap_or_default()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn history_snapshot(&self, endpoint: &str) -> Vec<Sample> {
        self.endpoints
            .lock()
            .get(endpoint)
            .map(|m| m.history.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_block(&self, endpoint: &str) -> Option<u64> {
        self.endpoints.lock().get(endpoint).and_then(|m| m.latest_block)
    }

    pub fn metadata(&self, endpoint: &str) -> Option<EndpointMetadata> {
        self.endpoints
            .lock()
            .get(endpoint)
            .map(|m| m.metadata.clone())
    }

    /// Full copy of one endpoint's state.
    pub fn snapshot(&self, endpoint: &str) -> Option<EndpointMetrics> {
        self.endpoints.lock().get(endpoint).cloned()
    }
}
