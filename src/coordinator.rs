use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::config::Endpoint;
use crate::error::ProbeError;
use crate::eta::{self, Eta, EtaPolicy};
use crate::metrics::{EndpointMetadata, EndpointMetrics, MetricsAggregator};
use crate::probe::EndpointProbe;
use crate::profile::ChainNames;
use crate::worker::PollingWorker;

pub const NOT_AVAILABLE: &str = "N/A";

/// Stand-in deadline when `start + duration` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub duration: Duration,
    pub poll_interval: Duration,
    pub eta_policy: EtaPolicy,
    pub show_network_id: bool,
    pub history_cap: usize,
}

/// Final per-endpoint figures handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSummary {
    pub average_latency: Duration,
    pub average_lag_secs: f64,
    pub eta: Eta,
    pub latest_block: Option<u64>,
    pub requests: u64,
    pub chain_id: Option<u64>,
    pub chain_name: String,
    pub client_version: String,
    /// Only set when network ids were requested
    pub network_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointStatus {
    Connected(EndpointSummary),
    ConnectionFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReport {
    pub name: String,
    pub status: EndpointStatus,
}

/// Endpoints in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub endpoints: Vec<EndpointReport>,
    pub eta_policy: EtaPolicy,
    pub show_network_id: bool,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &EndpointReport> {
        self.endpoints
            .iter()
            .filter(|e| matches!(e.status, EndpointStatus::ConnectionFailed { .. }))
    }
}

/// Runs one monitoring pass over a group of endpoints.
pub struct RunCoordinator {
    settings: RunSettings,
    names: ChainNames,
}

impl RunCoordinator {
    pub fn new(settings: RunSettings, names: ChainNames) -> Self {
        Self { settings, names }
    }

    /// Connect to every endpoint, poll the reachable ones until the shared
    /// deadline and summarise.
    ///
    /// `connect` builds the probe for an endpoint; an error there or in the
    /// connectivity check marks the endpoint as failed.
    pub async fn run<F>(&self, endpoints: &[Endpoint], connect: F) -> RunReport
    where
        F: Fn(&Endpoint) -> Result<Arc<dyn EndpointProbe>, ProbeError>,
    {
        let deadline = deadline_after(Instant::now(), self.settings.duration);
        let metrics = Arc::new(MetricsAggregator::new(self.settings.history_cap));

        let prepared = join_all(endpoints.iter().map(|endpoint| {
            let probe = connect(endpoint);
            let metrics = Arc::clone(&metrics);
            async move {
                let probe = probe?;
                let metadata = self.prepare(&endpoint.name, probe.as_ref()).await?;
                metrics.set_metadata(&endpoint.name, metadata);
                Ok::<_, ProbeError>(probe)
            }
        }))
        .await;

        let mut failures = Vec::with_capacity(endpoints.len());
        let mut handles = Vec::with_capacity(endpoints.len());
        for (endpoint, outcome) in endpoints.iter().zip(prepared) {
            match outcome {
                Ok(probe) => {
                    let worker = PollingWorker::new(
                        endpoint.name.clone(),
                        probe,
                        Arc::clone(&metrics),
                        self.settings.poll_interval,
                        deadline,
                    );
                    handles.push((endpoint.name.clone(), tokio::spawn(worker.run())));
                    failures.push(None);
                }
                Err(e) => {
                    warn!("[{}] Skipping due to connection issue: {}", endpoint.name, e);
                    failures.push(Some(e.to_string()));
                }
            }
        }

        info!("Polling {} endpoint(s)", handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(polls) => debug!("[{}] finished after {} successful polls", name, polls),
                Err(e) => error!("[{}] polling task aborted: {}", name, e),
            }
        }

        let now = Utc::now();
        let reports = endpoints
            .iter()
            .zip(failures)
            .map(|(endpoint, failure)| EndpointReport {
                name: endpoint.name.clone(),
                status: match failure {
                    Some(reason) => EndpointStatus::ConnectionFailed { reason },
                    None => {
                        let snapshot = metrics.snapshot(&endpoint.name).unwrap_or_default();
                        EndpointStatus::Connected(self.summarise(snapshot, now))
                    }
                },
            })
            .collect();

        RunReport {
            endpoints: reports,
            eta_policy: self.settings.eta_policy,
            show_network_id: self.settings.show_network_id,
        }
    }

    /// Connectivity check plus metadata. Only the connectivity check can fail.
    async fn prepare(
        &self,
        name: &str,
        probe: &dyn EndpointProbe,
    ) -> Result<EndpointMetadata, ProbeError> {
        probe.block_number().await?;

        let chain_id = match probe.chain_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("[{}] chain id unavailable: {}", name, e);
                None
            }
        };

        let network_id = if self.settings.show_network_id {
            match probe.network_id().await {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!("[{}] network id unavailable: {}", name, e);
                    None
                }
            }
        } else {
            None
        };

        let client_version = probe.client_version().await.unwrap_or_else(|e| {
            debug!("[{}] client version unavailable: {}", name, e);
            NOT_AVAILABLE.to_string()
        });

        Ok(EndpointMetadata {
            client_version,
            chain_id,
            network_id,
            chain_name: self.names.display_name(chain_id),
        })
    }

    /// All figures come from the same copy of the endpoint's state.
    fn summarise(
        &self,
        mut snapshot: EndpointMetrics,
        now: chrono::DateTime<Utc>,
    ) -> EndpointSummary {
        let history = snapshot.history.make_contiguous();
        let eta = eta::estimate(history, self.settings.eta_policy, now);
        EndpointSummary {
            average_latency: snapshot.average_latency(),
            average_lag_secs: snapshot.average_lag_secs(),
            eta,
            latest_block: snapshot.latest_block,
            requests: snapshot.total_requests,
            chain_id: snapshot.metadata.chain_id,
            chain_name: snapshot.metadata.chain_name,
            client_version: snapshot.metadata.client_version,
            network_id: snapshot.metadata.network_id,
        }
    }
}

fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .unwrap_or_else(|| start + FAR_FUTURE)
}
