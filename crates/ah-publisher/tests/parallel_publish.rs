//! Fan-out scenarios across real (mock) HTTP targets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ah_common::{Alert, AlertStatus, EnrichedAlert, ErrorKind, Target, TargetType};
use ah_format::FormatRegistry;
use ah_publisher::{
    HealthMonitor, HealthStrategy, MultiPublishError, MultiPublishOptions, MultiPublisher,
    PublisherSet, PublisherSetConfig,
};

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

fn webhook_target(name: &str, url: String) -> Target {
    let mut target = Target::new(name, TargetType::Webhook, url);
    target.format = "webhook".to_string();
    target
}

fn multi_publisher(options: MultiPublishOptions) -> (MultiPublisher, Arc<HealthMonitor>) {
    let registry = Arc::new(FormatRegistry::with_builtins());
    let publishers = Arc::new(
        PublisherSet::new(
            registry,
            PublisherSetConfig {
                allow_http: true,
                ..PublisherSetConfig::default()
            },
        )
        .unwrap(),
    );
    let health = Arc::new(HealthMonitor::default());
    (
        MultiPublisher::new(publishers, health.clone(), options),
        health,
    )
}

#[tokio::test]
async fn mixed_outcomes_with_unhealthy_target_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let targets = vec![
        webhook_target("target-1", format!("{}/ok", server.uri())),
        webhook_target("target-2", format!("{}/down", server.uri())),
        webhook_target("target-3", format!("{}/ok", server.uri())),
    ];

    let (publisher, health) = multi_publisher(MultiPublishOptions {
        health_strategy: HealthStrategy::SkipUnhealthy,
        check_health: true,
        ..MultiPublishOptions::default()
    });
    for _ in 0..3 {
        health.record_failure("target-2");
    }

    let result = publisher
        .publish_to_multiple(&alert("fp1"), &targets)
        .await
        .unwrap();

    assert_eq!(result.total_targets, 3);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 0);
    assert_eq!(result.skipped_count, 1);
    assert!(result.is_partial_success);
    assert!((result.success_rate() - 66.67).abs() < 0.1);
    assert!(result.success());
    assert!(!result.all_succeeded());

    let skipped = result
        .results
        .iter()
        .find(|r| r.target_name == "target-2")
        .unwrap();
    assert!(skipped.skipped);
    assert!(!skipped.success);
}

#[tokio::test]
async fn all_failures_surface_as_all_targets_failed_with_partial_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let targets = vec![
        webhook_target("bad-1", format!("{}/hook", server.uri())),
        webhook_target("bad-2", format!("{}/hook", server.uri())),
    ];

    let (publisher, _health) = multi_publisher(MultiPublishOptions::default());
    let failure = publisher
        .publish_to_multiple(&alert("fp1"), &targets)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        MultiPublishError::AllTargetsFailed {
            failures: 2,
            skipped: 0
        }
    ));
    assert_eq!(failure.error.kind(), ErrorKind::AllTargetsFailed);
    assert_eq!(failure.partial.results.len(), 2);
    assert!(failure.partial.all_failed());
    for entry in &failure.partial.results {
        assert_eq!(entry.error_kind, Some(ErrorKind::Validation));
    }
}

#[tokio::test]
async fn empty_target_list_is_invalid_input() {
    let (publisher, _health) = multi_publisher(MultiPublishOptions::default());
    let failure = publisher
        .publish_to_multiple(&alert("fp1"), &[])
        .await
        .unwrap_err();
    assert!(matches!(failure.error, MultiPublishError::InvalidInput(_)));
    assert_eq!(failure.partial.total_targets, 0);
}

#[tokio::test]
async fn everything_filtered_is_no_healthy_targets() {
    let server = MockServer::start().await;
    let targets = vec![webhook_target("down-1", format!("{}/hook", server.uri()))];

    let (publisher, health) = multi_publisher(MultiPublishOptions::default());
    for _ in 0..3 {
        health.record_failure("down-1");
    }

    let failure = publisher
        .publish_to_multiple(&alert("fp1"), &targets)
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        MultiPublishError::NoHealthyTargets { total: 1 }
    ));
    assert_eq!(failure.partial.skipped_count, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn deadline_cuts_off_slow_targets_but_keeps_completed_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let targets = vec![
        webhook_target("fast", format!("{}/fast", server.uri())),
        webhook_target("slow", format!("{}/slow", server.uri())),
    ];

    let (publisher, _health) = multi_publisher(MultiPublishOptions {
        timeout: Duration::from_millis(500),
        check_health: false,
        ..MultiPublishOptions::default()
    });
    let failure = publisher
        .publish_to_multiple(&alert("fp1"), &targets)
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        MultiPublishError::DeadlineExceeded { .. }
    ));
    assert_eq!(failure.error.kind(), ErrorKind::ContextTimeout);
    // The fast target completed before the deadline and is reported.
    assert!(failure
        .partial
        .results
        .iter()
        .any(|r| r.target_name == "fast" && r.success));
    assert!(!failure.partial.results.iter().any(|r| r.target_name == "slow"));
}

#[tokio::test]
async fn publish_to_all_ignores_health() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let targets = vec![webhook_target("flaky", format!("{}/hook", server.uri()))];
    let (publisher, health) = multi_publisher(MultiPublishOptions {
        health_strategy: HealthStrategy::PublishToAll,
        ..MultiPublishOptions::default()
    });
    for _ in 0..5 {
        health.record_failure("flaky");
    }

    let result = publisher
        .publish_to_multiple(&alert("fp1"), &targets)
        .await
        .unwrap();
    assert!(result.all_succeeded());
}
