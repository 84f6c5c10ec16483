use std::collections::HashMap;
use std::time::Duration;

use clap::ValueEnum;

use crate::eta::{EtaPolicy, EtaWindow};

const EVM_CHAINS: &[(u64, &str)] = &[
    (1, "Ethereum Mainnet"),
    (5, "Goerli"),
    (11155111, "Sepolia"),
    (56, "BNB Smart Chain"),
    (97, "BNB Testnet"),
    (137, "Polygon Mainnet"),
    (80001, "Mumbai"),
    (43114, "Avalanche C-Chain"),
    (43113, "Avalanche Fuji"),
    (10, "Optimism"),
    (8453, "Base"),
    (42161, "Arbitrum One"),
    (42170, "Arbitrum Nova"),
    (421614, "Arbitrum Sepolia"),
];

const AVALANCHE_CHAINS: &[(u64, &str)] = &[
    (43114, "Avalanche C-Chain Mainnet"),
    (43113, "Avalanche Fuji Testnet"),
    (1, "Ethereum Mainnet"),
    (5, "Goerli"),
    (11155111, "Sepolia"),
];

pub const UNKNOWN_CHAIN: &str = "Unknown";

/// Monitor flavour: the defaults and presentation that used to differ
/// between the generic and the Avalanche monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Evm,
    Avalanche,
}

/// Fixed-width layout of the summary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub endpoint_width: usize,
    pub lag_width: usize,
    pub eta_width: usize,
    pub chain_width: usize,
    pub chain_id_width: usize,
    /// Render block numbers as `19,000,000`
    pub group_block_digits: bool,
    /// Put the chain name before the chain id column
    pub chain_name_first: bool,
    pub failed_marker: &'static str,
}

impl Profile {
    pub fn static_chain_names(&self) -> &'static [(u64, &'static str)] {
        match self {
            Profile::Evm => EVM_CHAINS,
            Profile::Avalanche => AVALANCHE_CHAINS,
        }
    }

    pub fn default_poll_interval(&self) -> Duration {
        match self {
            Profile::Evm => Duration::from_millis(90),
            Profile::Avalanche => Duration::from_millis(200),
        }
    }

    pub fn default_eta_policy(&self) -> EtaPolicy {
        match self {
            Profile::Evm => EtaPolicy::TrendToZero {
                window: EtaWindow::Seconds(30),
            },
            Profile::Avalanche => EtaPolicy::TrendToTarget {
                target_lag_secs: 5,
                window: EtaWindow::Samples(20),
            },
        }
    }

    pub fn ident(&self) -> &'static str {
        match self {
            Profile::Evm => "blocklag_monitor",
            Profile::Avalanche => "avax_blocklag",
        }
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.ident().replace('_', "-"), env!("CARGO_PKG_VERSION"))
    }

    pub fn cache_file_name(&self) -> String {
        format!("{}_chainlist_names.json", self.ident())
    }

    pub fn layout(&self) -> ColumnLayout {
        match self {
            Profile::Evm => ColumnLayout {
                endpoint_width: 46,
                lag_width: 15,
                eta_width: 15,
                chain_width: 26,
                chain_id_width: 16,
                group_block_digits: true,
                chain_name_first: true,
                failed_marker: "Conn Failed",
            },
            Profile::Avalanche => ColumnLayout {
                endpoint_width: 34,
                lag_width: 12,
                eta_width: 16,
                chain_width: 28,
                chain_id_width: 18,
                group_block_digits: false,
                chain_name_first: false,
                failed_marker: "Connection Failed",
            },
        }
    }
}

/// Chain id to display name lookup for one run.
///
/// Remote names win over the profile's built-in table.
#[derive(Debug, Clone)]
pub struct ChainNames {
    remote: HashMap<u64, String>,
    fallback: &'static [(u64, &'static str)],
}

impl ChainNames {
    pub fn new(remote: HashMap<u64, String>, profile: Profile) -> Self {
        Self {
            remote,
            fallback: profile.static_chain_names(),
        }
    }

    pub fn display_name(&self, chain_id: Option<u64>) -> String {
        let Some(id) = chain_id else {
            return UNKNOWN_CHAIN.to_string();
        };
        if let Some(name) = self.remote.get(&id) {
            return name.clone();
        }
        self.fallback
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_else(|| UNKNOWN_CHAIN.to_string())
    }
}
