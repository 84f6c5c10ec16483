use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to a single RPC endpoint.
///
/// Returned by the initial connectivity check (the endpoint is then excluded
/// from polling), by individual polls (logged and skipped) and by metadata
/// lookups (the field is shown as absent).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("missing result for {0}")]
    MissingResult(&'static str),

    #[error("malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
}

/// Failure fetching the remote chain-name table.
///
/// Never fatal: the resolver falls back to a stale cache or an empty map.
#[derive(Debug, Error)]
pub enum NameFetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("payload contained no usable chain records")]
    NoUsableData,
}

/// Invalid or missing run configuration. Fatal before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no group '{group}' in {path}")]
    MissingGroup { group: String, path: PathBuf },

    #[error("group '{group}' in {path} must be a non-empty object of name -> url")]
    InvalidGroup { group: String, path: PathBuf },
}
