//! Chain id to name table fetched from ChainList, cached on disk.
//!
//! Lookup order: fresh cache file, remote fetch with retries, stale cache
//! (when allowed), empty map. Nothing here is fatal to a run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NameFetchError;

pub const DEFAULT_CHAINLIST_URL: &str = "https://chainlist.org/rpcs.json";
pub const DEFAULT_CHAINLIST_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Keys that may wrap the record list in an object payload.
const WRAPPER_KEYS: [&str; 3] = ["chains", "data", "result"];

/// Preferred name fields, in order.
const NAME_KEYS: [&str; 3] = ["name", "chain", "shortName"];

pub type ChainNameMap = HashMap<u64, String>;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub url: String,
    pub cache_path: PathBuf,
    pub ttl: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff_base: Duration,
    pub allow_stale: bool,
    pub user_agent: String,
}

/// Cache file contents after defensive parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameCacheEntry {
    pub source: Option<String>,
    pub fetched_at: Option<i64>,
    pub ttl: Option<u64>,
    pub names: ChainNameMap,
}

impl NameCacheEntry {
    fn is_fresh(&self, default_ttl: Duration, now: i64) -> bool {
        let Some(fetched_at) = self.fetched_at else {
            return false;
        };
        if self.names.is_empty() {
            return false;
        }
        let ttl = self.ttl.unwrap_or(default_ttl.as_secs());
        now.saturating_sub(fetched_at) <= i64::try_from(ttl).unwrap_or(i64::MAX)
    }
}

#[derive(Serialize)]
struct CacheFile<'a> {
    source: &'a str,
    fetched_at: i64,
    ttl: u64,
    data: BTreeMap<String, &'a str>,
}

/// Shape of a remote payload, tried in order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NamePayload {
    Records(Vec<Value>),
    Wrapped(serde_json::Map<String, Value>),
    Unusable(Value),
}

impl NamePayload {
    fn into_names(self) -> ChainNameMap {
        match self {
            NamePayload::Records(records) => names_from_records(&records),
            NamePayload::Wrapped(object) => WRAPPER_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_array))
                .map(|records| names_from_records(records))
                .unwrap_or_default(),
            NamePayload::Unusable(other) => {
                debug!("Unrecognised ChainList payload: {}", other);
                ChainNameMap::new()
            }
        }
    }
}

fn names_from_records(records: &[Value]) -> ChainNameMap {
    records
        .iter()
        .filter_map(|record| {
            let record = record.as_object()?;
            let id = record.get("chainId").and_then(chain_id_value)?;
            let name = NAME_KEYS
                .iter()
                .find_map(|key| record.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))?
                .trim();
            (!name.is_empty()).then(|| (id, name.to_string()))
        })
        .collect()
}

fn chain_id_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_digits(s),
        _ => None,
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Integer-ish field: number (floats truncated) or decimal digit string.
fn integer_field(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => parse_digits(s),
        _ => None,
    }
}

/// Parse cache file text. Bad entries are dropped; an unusable document
/// yields `None`.
pub fn parse_cache(raw: &str) -> Option<NameCacheEntry> {
    let doc: Value = serde_json::from_str(raw).ok()?;
    let object = doc.as_object()?;
    let data = object.get("data")?.as_object()?;

    let names = data
        .iter()
        .filter_map(|(key, value)| {
            let id = parse_digits(key)?;
            let name = value.as_str()?.trim();
            (!name.is_empty()).then(|| (id, name.to_string()))
        })
        .collect();

    Some(NameCacheEntry {
        source: object.get("source").and_then(Value::as_str).map(str::to_string),
        fetched_at: integer_field(object.get("fetched_at")).and_then(|v| i64::try_from(v).ok()),
        ttl: integer_field(object.get("ttl")),
        names,
    })
}

fn read_cache(path: &Path) -> Option<NameCacheEntry> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let entry = parse_cache(&raw);
            if entry.is_none() {
                debug!("ChainList cache {} is malformed, ignoring", path.display());
            }
            entry
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            debug!("ChainList cache read skipped: {}", e);
            None
        }
    }
}

fn write_cache(
    path: &Path,
    source: &str,
    ttl: Duration,
    names: &ChainNameMap,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = CacheFile {
        source,
        fetched_at: Utc::now().timestamp(),
        ttl: ttl.as_secs(),
        data: names
            .iter()
            .map(|(id, name)| (id.to_string(), name.as_str()))
            .collect(),
    };
    let json = serde_json::to_string(&file).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

/// `base * 2^(attempt - 1)`, saturating at `Duration::MAX`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Resolves chain names for one run.
pub struct RemoteNameResolver {
    config: ResolverConfig,
    client: reqwest::Client,
}

impl RemoteNameResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, NameFetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn resolve(&self) -> ChainNameMap {
        let cached = read_cache(&self.config.cache_path);

        if let Some(entry) = &cached {
            if entry.is_fresh(self.config.ttl, Utc::now().timestamp()) {
                debug!(
                    "Using fresh ChainList cache {} ({} names from {})",
                    self.config.cache_path.display(),
                    entry.names.len(),
                    entry.source.as_deref().unwrap_or("unknown source")
                );
                return entry.names.clone();
            }
        }

        match self.fetch_with_retries().await {
            Ok(names) => {
                if let Err(e) =
                    write_cache(&self.config.cache_path, &self.config.url, self.config.ttl, &names)
                {
                    debug!("ChainList cache write skipped: {}", e);
                }
                info!("Fetched {} chain names from {}", names.len(), self.config.url);
                names
            }
            Err(e) => match cached {
                Some(entry) if self.config.allow_stale && !entry.names.is_empty() => {
                    warn!(
                        "ChainList fetch failed ({}): {} - using stale cache ({})",
                        self.config.url,
                        e,
                        self.config.cache_path.display()
                    );
                    entry.names
                }
                _ => {
                    warn!(
                        "ChainList fetch failed ({}): {} - chain names may show as Unknown",
                        self.config.url, e
                    );
                    ChainNameMap::new()
                }
            },
        }
    }

    async fn fetch_with_retries(&self) -> Result<ChainNameMap, NameFetchError> {
        let attempts = self.config.retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once().await {
                Ok(names) => return Ok(names),
                Err(e) if attempt < attempts => {
                    let pause = backoff_delay(self.config.backoff_base, attempt);
                    debug!(
                        "ChainList fetch attempt {}/{} failed: {} (sleep {:?})",
                        attempt, attempts, e, pause
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self) -> Result<ChainNameMap, NameFetchError> {
        let body = self
            .client
            .get(&self.config.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let payload: NamePayload = serde_json::from_slice(&body)?;
        let names = payload.into_names();
        if names.is_empty() {
            return Err(NameFetchError::NoUsableData);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, cache_path: PathBuf, allow_stale: bool) -> ResolverConfig {
        ResolverConfig {
            url: format!("{}/rpcs.json", server.uri()),
            cache_path,
            ttl: DEFAULT_CHAINLIST_TTL,
            timeout: Duration::from_secs(5),
            retries: 2,
            backoff_base: Duration::from_millis(1),
            allow_stale,
            user_agent: "blocklag-monitor/test".to_string(),
        }
    }

    fn seed_cache(path: &Path, fetched_at: i64, ttl: Option<u64>) {
        let doc = json!({
            "source": "https://chainlist.org/rpcs.json",
            "fetched_at": fetched_at,
            "ttl": ttl,
            "data": { "1": "Ethereum Mainnet", "8453": "Base" }
        });
        std::fs::write(path, doc.to_string()).unwrap();
    }

    #[test]
    fn parses_record_lists_and_wrapped_objects() {
        let records = json!([
            { "chainId": 1, "name": " Ethereum Mainnet " },
            { "chainId": "10", "name": "", "chain": "OP Mainnet" },
            { "chainId": 56, "shortName": "bnb" },
            { "chainId": "0x5", "name": "hex id" },
            { "chainId": -3, "name": "negative" },
            { "chainId": 7, "name": "   " },
            "not a record"
        ]);
        let names: NamePayload = serde_json::from_value(records.clone()).unwrap();
        let names = names.into_names();
        assert_eq!(names.len(), 3);
        assert_eq!(names[&1], "Ethereum Mainnet");
        assert_eq!(names[&10], "OP Mainnet");
        assert_eq!(names[&56], "bnb");

        for key in WRAPPER_KEYS {
            let wrapped: NamePayload =
                serde_json::from_value(json!({ "meta": 1, key: records.clone() })).unwrap();
            assert_eq!(wrapped.into_names().len(), 3, "wrapped under {:?}", key);
        }

        // A non-list under an earlier key does not hide a later list
        let shadowed: NamePayload = serde_json::from_value(json!({
            "chains": { "count": 1 },
            "result": [{ "chainId": 8453, "name": "Base" }]
        }))
        .unwrap();
        assert_eq!(shadowed.into_names(), HashMap::from([(8453, "Base".to_string())]));

        let no_list: NamePayload =
            serde_json::from_value(json!({ "chains": "soon", "data": null })).unwrap();
        assert!(no_list.into_names().is_empty());

        let unusable: NamePayload = serde_json::from_value(json!("nope")).unwrap();
        assert!(unusable.into_names().is_empty());
    }

    #[test]
    fn cache_parsing_drops_bad_entries() {
        let raw = json!({
            "source": "x",
            "fetched_at": "1700000000",
            "ttl": 60.0,
            "data": { "1": "Ethereum", "abc": "bad key", "2": "  ", "3": 4, "-1": "neg" }
        })
        .to_string();
        let entry = parse_cache(&raw).unwrap();
        assert_eq!(entry.fetched_at, Some(1_700_000_000));
        assert_eq!(entry.ttl, Some(60));
        assert_eq!(entry.names, HashMap::from([(1, "Ethereum".to_string())]));

        assert!(parse_cache("{broken").is_none());
        assert!(parse_cache(r#"{"data": []}"#).is_none());
    }

    #[tokio::test]
    async fn fresh_cache_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, Utc::now().timestamp(), Some(3600));

        let resolver = RemoteNameResolver::new(config(&server, path, false)).unwrap();
        let names = resolver.resolve().await;
        assert_eq!(names[&8453], "Base");
        server.verify().await;
    }

    #[tokio::test]
    async fn expired_cache_is_refreshed_and_rewritten() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "chainId": 137, "name": "Polygon Mainnet" }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("names.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        seed_cache(&path, Utc::now().timestamp() - 7200, Some(3600));

        let resolver = RemoteNameResolver::new(config(&server, path.clone(), true)).unwrap();
        let names = resolver.resolve().await;
        assert_eq!(names, HashMap::from([(137, "Polygon Mainnet".to_string())]));

        let rewritten = parse_cache(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten.names, names);
        assert_eq!(rewritten.ttl, Some(DEFAULT_CHAINLIST_TTL.as_secs()));
        assert!(rewritten.fetched_at.unwrap() >= Utc::now().timestamp() - 60);
    }

    #[tokio::test]
    async fn failed_fetch_retries_then_uses_stale_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, 1_000, Some(60));

        let resolver = RemoteNameResolver::new(config(&server, path, true)).unwrap();
        let names = resolver.resolve().await;
        assert_eq!(names[&1], "Ethereum Mainnet");
        server.verify().await;
    }

    #[tokio::test]
    async fn failed_fetch_without_stale_fallback_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, 1_000, Some(60));

        let resolver = RemoteNameResolver::new(config(&server, path.clone(), false)).unwrap();
        assert!(resolver.resolve().await.is_empty());

        // The stale file is left alone.
        let kept = parse_cache(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(kept.fetched_at, Some(1_000));
    }

    #[tokio::test]
    async fn cache_without_ttl_uses_configured_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, Utc::now().timestamp() - 100, None);

        let mut config = config(&server, path, false);
        config.ttl = Duration::from_secs(1000);
        let names = RemoteNameResolver::new(config).unwrap().resolve().await;
        assert_eq!(names[&1], "Ethereum Mainnet");
        server.verify().await;
    }

    #[tokio::test]
    async fn configured_ttl_shorter_than_cache_age_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "chains": [{ "chainId": 10, "name": "OP Mainnet" }] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, Utc::now().timestamp() - 100, None);

        let mut config = config(&server, path, false);
        config.ttl = Duration::from_secs(50);
        let names = RemoteNameResolver::new(config).unwrap().resolve().await;
        assert_eq!(names, HashMap::from([(10, "OP Mainnet".to_string())]));
        server.verify().await;
    }

    #[tokio::test]
    async fn empty_payload_falls_back_to_stale_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "chains": [] })))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        seed_cache(&path, 1_000, Some(60));

        let resolver = RemoteNameResolver::new(config(&server, path.clone(), true)).unwrap();
        let names = resolver.resolve().await;
        assert_eq!(names.len(), 2);
        assert_eq!(names[&8453], "Base");
        server.verify().await;

        let kept = parse_cache(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(kept.fetched_at, Some(1_000));
        assert_eq!(kept.names, names);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 4), Duration::MAX);
        assert_eq!(backoff_delay(base, 40), Duration::MAX);
    }
}
