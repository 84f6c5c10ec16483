mod chainlist;
mod config;
mod coordinator;
mod error;
mod eta;
mod metrics;
mod probe;
mod profile;
mod report;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info, warn};

use crate::chainlist::{ChainNameMap, RemoteNameResolver, ResolverConfig, DEFAULT_CHAINLIST_URL};
use crate::coordinator::{RunCoordinator, RunSettings};
use crate::error::NameFetchError;
use crate::eta::{EtaPolicy, EtaWindow};
use crate::metrics::DEFAULT_HISTORY_CAP;
use crate::probe::{EndpointProbe, JsonRpcProbe};
use crate::profile::{ChainNames, Profile};

/// Monitor block lag & latency for a group of RPC endpoints
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Group name in the endpoints file, e.g. eth-sepolia
    group: String,

    /// Path to the endpoints file (JSON: group -> name -> url)
    #[arg(long, short = 'c', env = "BLOCKLAG_CONFIG", default_value = "endpoints.json")]
    config: PathBuf,

    /// Test length in seconds
    #[arg(long, short = 'd', env = "BLOCKLAG_DURATION", default_value = "30")]
    duration: u64,

    /// Delay between RPC calls in seconds (profile default when unset)
    #[arg(long, short = 'r', env = "BLOCKLAG_RATE")]
    rate: Option<f64>,

    /// Chain defaults, ETA policy and table layout
    #[arg(long, value_enum, env = "BLOCKLAG_PROFILE", default_value = "evm")]
    profile: Profile,

    /// Estimate time to reach this lag (seconds) instead of zero
    #[arg(long)]
    target_lag: Option<u64>,

    /// Seconds of history used to estimate ETA
    #[arg(long, conflicts_with = "eta_window_samples")]
    eta_window_secs: Option<u64>,

    /// Number of recent samples used to estimate ETA
    #[arg(long)]
    eta_window_samples: Option<usize>,

    /// Show net_version (Network ID) for diagnostics. Not guaranteed to equal chainId.
    #[arg(long)]
    show_netid: bool,

    /// Samples kept per endpoint for ETA estimation
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAP)]
    history_cap: usize,

    /// Per-request RPC timeout in seconds
    #[arg(long, default_value = "10")]
    rpc_timeout: u64,

    /// Also write a CSV summary into this directory
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Disable ChainList lookup (built-in chain names only)
    #[arg(long)]
    no_chainlist: bool,

    /// ChainList API URL
    #[arg(long, default_value = DEFAULT_CHAINLIST_URL)]
    chainlist_url: String,

    /// ChainList cache TTL in seconds
    #[arg(long, default_value = "86400")]
    chainlist_ttl: u64,

    /// ChainList cache file (default: ~/.cache/<profile>_chainlist_names.json)
    #[arg(long)]
    chainlist_cache: Option<PathBuf>,

    /// ChainList fetch timeout in seconds
    #[arg(long, default_value = "15")]
    chainlist_timeout: u64,

    /// ChainList fetch retries
    #[arg(long, default_value = "2")]
    chainlist_retries: u32,

    /// ChainList retry backoff base in seconds
    #[arg(long, default_value = "0.5")]
    chainlist_backoff: f64,

    /// If the ChainList fetch fails, use a stale cache if present
    #[arg(long)]
    chainlist_allow_stale: bool,
}

impl Args {
    fn eta_policy(&self) -> EtaPolicy {
        let default = self.profile.default_eta_policy();
        let window = match (self.eta_window_secs, self.eta_window_samples) {
            (Some(secs), _) => EtaWindow::Seconds(secs),
            (None, Some(samples)) => EtaWindow::Samples(samples),
            (None, None) => default.window(),
        };
        match (self.target_lag, default) {
            (Some(target_lag_secs), _) => EtaPolicy::TrendToTarget {
                target_lag_secs,
                window,
            },
            (None, EtaPolicy::TrendToTarget { target_lag_secs, .. }) => {
                EtaPolicy::TrendToTarget {
                    target_lag_secs,
                    window,
                }
            }
            (None, EtaPolicy::TrendToZero { .. }) => EtaPolicy::TrendToZero { window },
        }
    }

    fn poll_interval(&self) -> Result<Duration> {
        match self.rate {
            Some(rate) => Duration::try_from_secs_f64(rate)
                .map_err(|e| anyhow!("Invalid --rate {}: {}", rate, e)),
            None => Ok(self.profile.default_poll_interval()),
        }
    }

    fn resolver_config(&self) -> Result<ResolverConfig> {
        let cache_path = self.chainlist_cache.clone().unwrap_or_else(|| {
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
            home.join(".cache").join(self.profile.cache_file_name())
        });
        Ok(ResolverConfig {
            url: self.chainlist_url.clone(),
            cache_path,
            ttl: Duration::from_secs(self.chainlist_ttl),
            timeout: Duration::from_secs(self.chainlist_timeout),
            retries: self.chainlist_retries,
            backoff_base: Duration::try_from_secs_f64(self.chainlist_backoff)
                .map_err(|e| anyhow!("Invalid --chainlist-backoff: {}", e))?,
            allow_stale: self.chainlist_allow_stale,
            user_agent: self.profile.user_agent(),
        })
    }
}

/// A resolver that cannot be built leaves only the built-in names.
async fn resolve_names(resolver: Result<RemoteNameResolver, NameFetchError>) -> ChainNameMap {
    match resolver {
        Ok(resolver) => {
            let names = resolver.resolve().await;
            if !names.is_empty() {
                info!("Loaded {} chain names from ChainList (cache/API)", names.len());
            }
            names
        }
        Err(e) => {
            warn!("ChainList lookup disabled for this run: {}", e);
            ChainNameMap::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();

    info!("Loading endpoints from {} (group={})", args.config.display(), args.group);
    let endpoints = config::load_endpoints(&args.group, &args.config)?;

    let poll_interval = args.poll_interval()?;
    let settings = RunSettings {
        duration: Duration::from_secs(args.duration),
        poll_interval,
        eta_policy: args.eta_policy(),
        show_network_id: args.show_netid,
        history_cap: args.history_cap,
    };

    // Load the chain id -> name table once per run
    let remote_names = if args.no_chainlist {
        ChainNameMap::new()
    } else {
        resolve_names(RemoteNameResolver::new(args.resolver_config()?)).await
    };
    let names = ChainNames::new(remote_names, args.profile);

    info!(
        "Testing {} endpoint(s) for {} s at one call every {:.2} s",
        endpoints.len(),
        args.duration,
        poll_interval.as_secs_f64()
    );

    let rpc_timeout = Duration::from_secs(args.rpc_timeout);
    let report = RunCoordinator::new(settings, names)
        .run(&endpoints, |endpoint| {
            let probe = JsonRpcProbe::new(endpoint.url.clone(), rpc_timeout)?;
            Ok(Arc::new(probe) as Arc<dyn EndpointProbe>)
        })
        .await;

    let layout = args.profile.layout();
    report::log_report(&report, &layout);

    let failed = report.failed().count();
    if failed > 0 {
        info!("{} of {} endpoint(s) could not be reached", failed, endpoints.len());
    }

    if let Some(output_dir) = &args.output_dir {
        if let Err(e) = report::write_csv(&report, &args.group, output_dir) {
            error!("Failed to write CSV summary: {}", e);
        }
    }

    Ok(())
}
