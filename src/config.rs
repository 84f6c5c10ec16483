use std::path::Path;

use log::debug;
use serde_json::Value;

use crate::error::ConfigError;

/// A named RPC endpoint. Names are unique within a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Load the endpoints of `group` from a JSON file shaped as
/// `{ "<group>": { "<name>": "<url>", ... }, ... }`.
///
/// Entries keep the file's order. Non-string urls are skipped.
pub fn load_endpoints(group: &str, path: &Path) -> Result<Vec<Endpoint>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    parse_endpoints(group, &raw, path)
}

fn parse_endpoints(group: &str, raw: &str, path: &Path) -> Result<Vec<Endpoint>, ConfigError> {
    let doc: Value = serde_json::from_str(raw).map_err(|source| ConfigError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })?;

    let group_value = doc
        .get(group)
        .ok_or_else(|| ConfigError::MissingGroup {
            group: group.to_string(),
            path: path.to_path_buf(),
        })?;

    let invalid = || ConfigError::InvalidGroup {
        group: group.to_string(),
        path: path.to_path_buf(),
    };

    let entries = group_value.as_object().ok_or_else(invalid)?;

    let endpoints: Vec<Endpoint> = entries
        .iter()
        .filter_map(|(name, url)| match url.as_str() {
            Some(url) => Some(Endpoint::new(name.as_str(), url)),
            None => {
                debug!("Skipping non-string url for endpoint {}", name);
                None
            }
        })
        .collect();

    if endpoints.is_empty() {
        return Err(invalid());
    }

    Ok(endpoints)
}
