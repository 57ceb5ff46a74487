//! Dynamic target discovery.
//!
//! Publishing targets are not configured statically: they are read from an
//! external secret store, one record per target, and re-read periodically.
//! Each refresh parses the full record set into a new target map and swaps
//! it in atomically: readers always see either the old or the new complete
//! set, never a partial merge.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use ah_common::{ErrorKind, Target, TargetType};

/// Default interval between discovery refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("secret store error: {0}")]
    Store(String),
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // Store failures are transient from the pipeline's point of
            // view; the next refresh tick retries.
            DiscoveryError::Store(_) => ErrorKind::Network,
        }
    }
}

/// One record from the secret store: an opaque name plus a key-value
/// payload with byte values.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub name: String,
    pub data: HashMap<String, Vec<u8>>,
}

impl SecretRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .insert(key.into(), value.into().into_bytes());
        self
    }

    /// A payload field decoded as trimmed UTF-8.
    fn field(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// External secret store collaborator.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List every target record currently stored.
    async fn list(&self) -> Result<Vec<SecretRecord>, DiscoveryError>;

    /// Store name, for logging.
    fn name(&self) -> &str;
}

/// Discovery behavior knobs.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Admit plain-http target URLs. Test-only escape hatch for local mock
    /// servers; production discovery rejects anything that is not HTTPS.
    pub allow_http: bool,
}

/// Parse one secret record into a target. Returns `None` (with a warning)
/// when the record is unusable; discovery skips it and carries on.
pub fn parse_target(record: &SecretRecord) -> Option<Target> {
    parse_target_with(record, false)
}

fn parse_target_with(record: &SecretRecord, allow_http: bool) -> Option<Target> {
    let Some(type_field) = record.field("type") else {
        warn!(record = %record.name, "Skipping record without a type");
        return None;
    };
    let Some(url) = record.field("url") else {
        warn!(record = %record.name, "Skipping record without a url");
        return None;
    };
    let target_type = match TargetType::from_str(&type_field) {
        Ok(t) => t,
        Err(_) => {
            warn!(record = %record.name, record_type = %type_field, "Skipping record with unknown type");
            return None;
        }
    };

    let mut target = Target::new(
        record.field("name").unwrap_or_else(|| record.name.clone()),
        target_type,
        url,
    );

    if let Some(enabled) = record.field("enabled") {
        match enabled.to_ascii_lowercase().as_str() {
            "true" => target.enabled = true,
            "false" => target.enabled = false,
            other => {
                warn!(
                    record = %record.name,
                    enabled = %other,
                    "Unparseable enabled flag, defaulting to true"
                );
            }
        }
    }

    if let Some(format) = record.field("format") {
        target.format = format;
    }

    if let Some(headers) = record.field("headers") {
        for pair in headers.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    target
                        .headers
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => warn!(record = %record.name, pair = %pair, "Skipping malformed header pair"),
            }
        }
    }

    // Credentials fold into a canonical Authorization header. When both are
    // present, auth_token wins.
    if let Some(api_key) = record.field("api_key") {
        target
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", api_key));
    }
    if let Some(auth_token) = record.field("auth_token") {
        target
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", auth_token));
    }

    if let Err(err) = validate_parsed(&target, allow_http) {
        warn!(record = %record.name, error = %err, "Skipping record with invalid target");
        return None;
    }
    Some(target)
}

/// `Target::validate`, with the url check honoring `allow_http`.
fn validate_parsed(target: &Target, allow_http: bool) -> Result<(), String> {
    if target.name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    ah_common::urlcheck::validate(&target.url, allow_http).map_err(|e| e.to_string())?;
    if target.headers.len() > ah_common::MAX_TARGET_HEADERS {
        return Err("too many headers".to_string());
    }
    for (key, value) in &target.headers {
        if value.len() > ah_common::MAX_HEADER_VALUE_BYTES {
            return Err(format!("header value for {key} too large"));
        }
    }
    Ok(())
}

/// Handle to a running discovery refresh task.
///
/// `stop()` is idempotent and never blocks; the task observes the signal on
/// its next tick at the latest.
pub struct DiscoveryHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl DiscoveryHandle {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Discovered-target set with atomic swap semantics.
pub struct TargetDiscovery {
    store: Arc<dyn SecretStore>,
    config: DiscoveryConfig,
    targets: RwLock<Arc<HashMap<String, Target>>>,
}

impl TargetDiscovery {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_config(store, DiscoveryConfig::default())
    }

    pub fn with_config(store: Arc<dyn SecretStore>, config: DiscoveryConfig) -> Self {
        Self {
            store,
            config,
            targets: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Re-read the secret store and swap in the freshly parsed target set.
    /// Returns the number of targets discovered.
    pub async fn refresh(&self) -> Result<usize, DiscoveryError> {
        let records = self.store.list().await?;
        let record_count = records.len();

        let mut parsed: HashMap<String, Target> = HashMap::new();
        for record in &records {
            if let Some(target) = parse_target_with(record, self.config.allow_http) {
                if parsed.contains_key(&target.name) {
                    warn!(target_name = %target.name, "Duplicate target name, keeping the latest");
                }
                parsed.insert(target.name.clone(), target);
            }
        }

        let count = parsed.len();
        *self.targets.write() = Arc::new(parsed);

        metrics::gauge!("publishing_discovered_targets").set(count as f64);
        info!(
            store = self.store.name(),
            records = record_count,
            targets = count,
            "Target discovery refreshed"
        );
        Ok(count)
    }

    /// The current complete target set. The returned map is an immutable
    /// snapshot; a concurrent refresh never mutates it.
    pub fn targets(&self) -> Arc<HashMap<String, Target>> {
        self.targets.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Target> {
        self.targets.read().get(name).cloned()
    }

    pub fn enabled_targets(&self) -> Vec<Target> {
        self.targets
            .read()
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.targets.read().values().filter(|t| t.enabled).count()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Start the periodic refresh task. Callers keeping their own handle
    /// pass a clone: `discovery.clone().start(interval)`.
    pub fn start(self: Arc<Self>, interval: Duration) -> DiscoveryHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let discovery = self;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = discovery.refresh().await {
                            warn!(error = %err, "Target discovery refresh failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Target discovery task shutting down");
                        break;
                    }
                }
            }
        });

        DiscoveryHandle { shutdown_tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticStore {
        records: parking_lot::Mutex<Vec<SecretRecord>>,
    }

    impl StaticStore {
        fn new(records: Vec<SecretRecord>) -> Self {
            Self {
                records: parking_lot::Mutex::new(records),
            }
        }

        fn set(&self, records: Vec<SecretRecord>) {
            *self.records.lock() = records;
        }
    }

    #[async_trait]
    impl SecretStore for StaticStore {
        async fn list(&self) -> Result<Vec<SecretRecord>, DiscoveryError> {
            Ok(self.records.lock().clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn webhook_record(name: &str) -> SecretRecord {
        SecretRecord::new(name)
            .with_field("type", "webhook")
            .with_field("url", "https://hooks.example.com/alert")
    }

    #[test]
    fn parses_a_full_record() {
        let record = webhook_record("team-a")
            .with_field("name", "team-a-hook")
            .with_field("enabled", "FALSE")
            .with_field("format", "alertmanager")
            .with_field("headers", "X-Team=a, X-Env=prod")
            .with_field("api_key", "k1");

        let target = parse_target(&record).unwrap();
        assert_eq!(target.name, "team-a-hook");
        assert_eq!(target.target_type, TargetType::Webhook);
        assert_eq!(target.format, "alertmanager");
        assert!(!target.enabled);
        assert_eq!(target.headers.get("X-Team").unwrap(), "a");
        assert_eq!(target.headers.get("X-Env").unwrap(), "prod");
        assert_eq!(target.headers.get("Authorization").unwrap(), "Bearer k1");
    }

    #[test]
    fn defaults_fill_in() {
        let target = parse_target(&webhook_record("plain")).unwrap();
        assert_eq!(target.name, "plain");
        assert!(target.enabled);
        assert_eq!(target.format, "webhook");
        assert!(target.headers.is_empty());
    }

    #[test]
    fn auth_token_wins_over_api_key() {
        let record = webhook_record("r")
            .with_field("api_key", "k1")
            .with_field("auth_token", "t1");
        let target = parse_target(&record).unwrap();
        assert_eq!(target.headers.get("Authorization").unwrap(), "Bearer t1");
    }

    #[test]
    fn unusable_records_are_skipped() {
        assert!(parse_target(&SecretRecord::new("no-type").with_field("url", "https://x.example.com")).is_none());
        assert!(parse_target(&SecretRecord::new("no-url").with_field("type", "webhook")).is_none());
        assert!(parse_target(
            &SecretRecord::new("bad-type")
                .with_field("type", "carrier-pigeon")
                .with_field("url", "https://x.example.com")
        )
        .is_none());
        assert!(parse_target(
            &SecretRecord::new("bad-url")
                .with_field("type", "webhook")
                .with_field("url", "http://x.example.com")
        )
        .is_none());
    }

    #[test]
    fn invalid_enabled_defaults_to_true() {
        let target = parse_target(&webhook_record("r").with_field("enabled", "yes")).unwrap();
        assert!(target.enabled);
    }

    #[tokio::test]
    async fn refresh_swaps_the_complete_set() {
        let store = Arc::new(StaticStore::new(vec![
            webhook_record("a"),
            webhook_record("b"),
            SecretRecord::new("broken"),
        ]));
        let discovery = TargetDiscovery::new(store.clone());

        assert_eq!(discovery.refresh().await.unwrap(), 2);
        assert_eq!(discovery.len(), 2);
        let old_snapshot = discovery.targets();

        store.set(vec![webhook_record("c")]);
        assert_eq!(discovery.refresh().await.unwrap(), 1);
        assert!(discovery.get("a").is_none());
        assert!(discovery.get("c").is_some());

        // The previously handed-out snapshot is untouched.
        assert_eq!(old_snapshot.len(), 2);
        assert!(old_snapshot.contains_key("a"));
    }

    #[tokio::test]
    async fn enabled_counts_ignore_disabled_targets() {
        let store = Arc::new(StaticStore::new(vec![
            webhook_record("on"),
            webhook_record("off").with_field("enabled", "false"),
        ]));
        let discovery = TargetDiscovery::new(store);
        discovery.refresh().await.unwrap();

        assert_eq!(discovery.len(), 2);
        assert_eq!(discovery.enabled_count(), 1);
        assert_eq!(discovery.enabled_targets()[0].name, "on");
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_runs_and_stops() {
        let store = Arc::new(StaticStore::new(vec![webhook_record("a")]));
        let discovery = Arc::new(TargetDiscovery::new(store.clone()));
        let handle = discovery.clone().start(Duration::from_secs(60));

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(discovery.len(), 1);

        store.set(vec![webhook_record("a"), webhook_record("b")]);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(discovery.len(), 2);

        handle.stop();
        tokio::task::yield_now().await;
        store.set(vec![]);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(discovery.len(), 2);
    }
}
