//! Probe behavior against live HTTP doubles.

use std::sync::Arc;
use std::time::Duration;

use lingualink_balance::{BackendRegistry, BackendStatus, HealthProber, ProberConfig};
use lingualink_core::BackendConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prober_config() -> ProberConfig {
    ProberConfig { interval: Duration::from_millis(50), failure_threshold: 3 }
}

async fn models_endpoint(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn successful_probe_keeps_backend_healthy_and_records_latency() {
    let server = MockServer::start().await;
    models_endpoint(&server, 200).await;

    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        server.uri(),
        "model",
        "probe-token",
    )]));
    let prober = HealthProber::new(Arc::clone(&registry), prober_config()).unwrap();

    let status = prober.probe_one("a").await.unwrap();
    assert_eq!(status, BackendStatus::Healthy);

    let snap = registry.snapshot("a").unwrap();
    assert_eq!(snap.metrics.consecutive_failures, 0);
    assert!(snap.metrics.last_check_time.is_some());
    assert!(snap.metrics.average_response_time > 0.0);
}

#[tokio::test]
async fn probe_sends_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer probe-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        server.uri(),
        "model",
        "probe-token",
    )]));
    let prober = HealthProber::new(Arc::clone(&registry), prober_config()).unwrap();
    prober.probe_one("a").await.unwrap();
}

#[tokio::test]
async fn three_failed_probes_demote_to_unhealthy() {
    let server = MockServer::start().await;
    models_endpoint(&server, 503).await;

    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        server.uri(),
        "model",
        "key",
    )]));
    let prober = HealthProber::new(Arc::clone(&registry), prober_config()).unwrap();

    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Healthy);
    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Healthy);
    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Unhealthy);

    let snap = registry.snapshot("a").unwrap();
    assert_eq!(snap.metrics.consecutive_failures, 3);
    assert_eq!(snap.metrics.last_error.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn recovered_backend_returns_to_healthy_on_next_probe() {
    let server = MockServer::start().await;
    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        server.uri(),
        "model",
        "key",
    )]));
    let prober = HealthProber::new(Arc::clone(&registry), prober_config()).unwrap();

    {
        let _guard = Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount_as_scoped(&server)
            .await;
        for _ in 0..3 {
            prober.probe_one("a").await.unwrap();
        }
        assert_eq!(registry.status("a"), Some(BackendStatus::Unhealthy));
    }

    models_endpoint(&server, 200).await;
    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Healthy);
    assert_eq!(registry.snapshot("a").unwrap().metrics.consecutive_failures, 0);
}

#[tokio::test]
async fn disabled_backend_is_probed_but_never_promoted() {
    let server = MockServer::start().await;
    models_endpoint(&server, 200).await;

    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        server.uri(),
        "model",
        "key",
    )]));
    registry.disable("a");

    let prober = HealthProber::new(Arc::clone(&registry), prober_config()).unwrap();
    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Disabled);
    assert!(registry.snapshot("a").unwrap().metrics.last_check_time.is_some());
}

#[tokio::test]
async fn unreachable_backend_records_the_connection_error() {
    // Nothing is listening on this port.
    let registry = Arc::new(BackendRegistry::new(vec![BackendConfig::new(
        "a",
        "http://127.0.0.1:9",
        "model",
        "key",
    )]));
    let prober = HealthProber::new(
        Arc::clone(&registry),
        ProberConfig { interval: Duration::from_millis(50), failure_threshold: 1 },
    )
    .unwrap();

    assert_eq!(prober.probe_one("a").await.unwrap(), BackendStatus::Unhealthy);
    assert!(registry.snapshot("a").unwrap().metrics.last_error.is_some());
}

#[tokio::test]
async fn probe_loop_fans_out_to_every_backend() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    models_endpoint(&server_a, 200).await;
    models_endpoint(&server_b, 502).await;

    let registry = Arc::new(BackendRegistry::new(vec![
        BackendConfig::new("a", server_a.uri(), "model", "key"),
        BackendConfig::new("b", server_b.uri(), "model", "key"),
    ]));
    let prober = Arc::new(
        HealthProber::new(
            Arc::clone(&registry),
            ProberConfig { interval: Duration::from_millis(20), failure_threshold: 1 },
        )
        .unwrap(),
    );

    assert!(prober.start());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(prober.stop());

    assert_eq!(registry.status("a"), Some(BackendStatus::Healthy));
    assert_eq!(registry.status("b"), Some(BackendStatus::Unhealthy));
}
