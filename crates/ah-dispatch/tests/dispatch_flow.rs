//! End-to-end dispatch: discovery -> mode -> queue -> workers -> HTTP target.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ah_common::{Alert, AlertStatus, EnrichedAlert, JobState, Mode};
use ah_discovery::{
    DiscoveryConfig, DiscoveryError, SecretRecord, SecretStore, TargetDiscovery,
};
use ah_dispatch::{DispatchError, Dispatcher, DispatcherConfig, JobFilter, WorkerPoolConfig};
use ah_format::FormatRegistry;
use ah_publisher::{HealthMonitor, PublisherSet, PublisherSetConfig};

struct StaticStore {
    records: std::sync::Mutex<Vec<SecretRecord>>,
}

impl StaticStore {
    fn new(records: Vec<SecretRecord>) -> Self {
        Self {
            records: std::sync::Mutex::new(records),
        }
    }

    fn set(&self, records: Vec<SecretRecord>) {
        *self.records.lock().unwrap() = records;
    }
}

#[async_trait]
impl SecretStore for StaticStore {
    async fn list(&self) -> Result<Vec<SecretRecord>, DiscoveryError> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn alert(fingerprint: &str) -> EnrichedAlert {
    EnrichedAlert {
        alert: Alert {
            fingerprint: fingerprint.to_string(),
            name: "HighCpuUsage".to_string(),
            status: AlertStatus::Firing,
            labels: BTreeMap::from([("severity".to_string(), "critical".to_string())]),
            annotations: BTreeMap::new(),
            starts_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            ends_at: None,
            generator_url: None,
        },
        classification: None,
        enrichment_metadata: None,
    }
}

fn webhook_record(name: &str, url: String) -> SecretRecord {
    SecretRecord::new(name)
        .with_field("type", "webhook")
        .with_field("url", url)
}

fn build_dispatcher(store: Arc<StaticStore>) -> (Arc<Dispatcher>, Arc<TargetDiscovery>) {
    let discovery = Arc::new(TargetDiscovery::with_config(
        store,
        DiscoveryConfig { allow_http: true },
    ));
    let publishers = Arc::new(
        PublisherSet::new(
            Arc::new(FormatRegistry::with_instrumented_builtins()),
            PublisherSetConfig {
                allow_http: true,
                ..PublisherSetConfig::default()
            },
        )
        .unwrap(),
    );
    let dispatcher = Dispatcher::new(
        discovery.clone(),
        publishers,
        Arc::new(HealthMonitor::default()),
        DispatcherConfig {
            worker: WorkerPoolConfig {
                workers: 2,
                retry_base: Duration::from_millis(5),
                retry_max: Duration::from_millis(20),
                ..WorkerPoolConfig::default()
            },
            ..DispatcherConfig::default()
        },
    );
    (dispatcher, discovery)
}

async fn wait_for<F: Fn() -> bool>(predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn dispatch_delivers_to_discovered_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(StaticStore::new(vec![webhook_record(
        "team-a",
        format!("{}/hook", server.uri()),
    )]));
    let (dispatcher, discovery) = build_dispatcher(store);
    discovery.refresh().await.unwrap();

    let submitted = dispatcher.dispatch(&alert("fp1")).await.unwrap();
    assert_eq!(submitted, 1);

    let tracker = dispatcher.tracker().clone();
    wait_for(move || {
        tracker
            .list(&JobFilter {
                state: Some(JobState::Succeeded),
                ..JobFilter::default()
            })
            .len()
            == 1
    })
    .await;

    let stats = dispatcher.stats();
    assert_eq!(stats.mode, Mode::Normal);
    assert_eq!(stats.enabled_targets, 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn mode_toggles_with_discovery_and_notifies_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(StaticStore::new(vec![]));
    let (dispatcher, discovery) = build_dispatcher(store.clone());
    discovery.refresh().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    dispatcher.mode_manager().subscribe(move |from, to, reason| {
        let _ = tx.send((from, to, reason.to_string()));
    });

    // No targets: metrics-only, the alert is observed but nothing queues.
    assert_eq!(dispatcher.dispatch(&alert("fp1")).await.unwrap(), 0);
    let status = dispatcher.mode_status();
    assert!(status.metrics_only_active);
    assert_eq!(status.enabled_targets, 0);

    // A target appears: next dispatch flips to normal and publishes.
    store.set(vec![webhook_record("t", format!("{}/hook", server.uri()))]);
    discovery.refresh().await.unwrap();
    assert_eq!(dispatcher.dispatch(&alert("fp2")).await.unwrap(), 1);

    let (from, to, _) = rx.recv().await.unwrap();
    assert_eq!(from, Mode::MetricsOnly);
    assert_eq!(to, Mode::Normal);

    // Targets vanish again: back to metrics-only, second transition.
    store.set(vec![]);
    discovery.refresh().await.unwrap();
    let (mode, changed) = dispatcher.sync_mode();
    assert_eq!(mode, Mode::MetricsOnly);
    assert!(changed);
    let (from, to, reason) = rx.recv().await.unwrap();
    assert_eq!(from, Mode::Normal);
    assert_eq!(to, Mode::MetricsOnly);
    assert_eq!(reason, "no enabled targets");
    assert_eq!(dispatcher.mode_status().transition_count, 2);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn failing_target_dead_letters_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(StaticStore::new(vec![webhook_record(
        "bad",
        format!("{}/hook", server.uri()),
    )]));
    let (dispatcher, discovery) = build_dispatcher(store);
    discovery.refresh().await.unwrap();

    dispatcher.dispatch(&alert("fp1")).await.unwrap();

    let tracker = dispatcher.tracker().clone();
    wait_for(move || {
        tracker
            .list(&JobFilter {
                state: Some(JobState::DeadLetter),
                ..JobFilter::default()
            })
            .len()
            == 1
    })
    .await;

    let dead = dispatcher.tracker().list(&JobFilter {
        state: Some(JobState::DeadLetter),
        ..JobFilter::default()
    });
    // Auth failures are permanent: no worker-level retries happened.
    assert_eq!(dead[0].retry_count, 0);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn sync_fanout_reports_aggregate_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let store = Arc::new(StaticStore::new(vec![
        webhook_record("good", format!("{}/ok", server.uri())),
        webhook_record("bad", format!("{}/bad", server.uri())),
    ]));
    let (dispatcher, discovery) = build_dispatcher(store);
    discovery.refresh().await.unwrap();

    let result = dispatcher.publish_sync(&alert("fp1")).await.unwrap();
    assert_eq!(result.total_targets, 2);
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 1);
    assert!(result.is_partial_success);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn dispatch_rejects_invalid_alerts() {
    let store = Arc::new(StaticStore::new(vec![]));
    let (dispatcher, _discovery) = build_dispatcher(store);

    let mut bad = alert("");
    bad.alert.fingerprint.clear();
    let err = dispatcher.dispatch(&bad).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidInput(_)));
    dispatcher.shutdown().await;
}
