//! End-to-end dispatch flows against wiremock upstreams.

use std::sync::Arc;
use std::time::Duration;

use lingualink_auth::CreateKey;
use lingualink_core::{BackendConfig, Error, Settings, RAW_TEXT_KEY};
use lingualink_service::{AppContext, AudioUpload, DispatchRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPLY: &str = "原文：hello world\n英文：hello world\n日文：こんにちは";

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "choices": [{"message": {"content": content}}]
    }))
}

async fn chat_endpoint(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn wav_upload() -> AudioUpload {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..3200 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    AudioUpload { filename: "clip.wav".to_string(), data: cursor.into_inner() }
}

struct Fixture {
    context: Arc<AppContext>,
    temp_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

/// Build a gateway over the given backends. Auth on, cache off.
fn fixture(backends: Vec<BackendConfig>, max_retries: u32, auth_enabled: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let temp_dir = dir.path().join("tmp");
    std::fs::create_dir_all(&temp_dir).unwrap();
    let settings = Settings {
        database_path: dir.path().join("db").join("keys.db"),
        temp_dir: Some(temp_dir.clone()),
        llm_backends: Some(backends),
        load_balance_enabled: Some(true),
        max_retries,
        auth_enabled,
        ..Settings::default()
    };
    let context = AppContext::from_settings(settings).unwrap();
    Fixture { context, temp_dir, _dir: dir }
}

fn temp_file_count(fixture: &Fixture) -> usize {
    std::fs::read_dir(&fixture.temp_dir).unwrap().count()
}

#[tokio::test]
async fn round_robin_alternates_backends_and_meters_the_credential() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    chat_endpoint(&server_a, chat_reply(REPLY)).await;
    chat_endpoint(&server_b, chat_reply(REPLY)).await;

    let fixture = fixture(
        vec![
            BackendConfig::new("a", server_a.uri(), "model-a", "ka"),
            BackendConfig::new("b", server_b.uri(), "model-b", "kb"),
        ],
        2,
        true,
    );
    let secret = fixture.context.verifier.create(CreateKey::default()).unwrap();

    let mut picked = Vec::new();
    for _ in 0..5 {
        let outcome = fixture
            .context
            .dispatcher
            .handle(wav_upload(), DispatchRequest::default(), Some(&secret))
            .await
            .unwrap();
        picked.push(outcome.backend);
    }
    assert_eq!(picked, vec!["a", "b", "a", "b", "a"]);

    let record = fixture.context.verifier.store().get(&secret).unwrap().unwrap();
    assert_eq!(record.usage_count, 5);

    // Selection/release parity: no slot left behind.
    assert_eq!(fixture.context.registry.active_connections("a"), Some(0));
    assert_eq!(fixture.context.registry.active_connections("b"), Some(0));
    assert_eq!(temp_file_count(&fixture), 0);
}

#[tokio::test]
async fn failing_backend_fails_over_within_one_request() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    chat_endpoint(&server_a, ResponseTemplate::new(503)).await;
    chat_endpoint(&server_b, chat_reply(REPLY)).await;

    let fixture = fixture(
        vec![
            BackendConfig::new("a", server_a.uri(), "m", "k"),
            BackendConfig::new("b", server_b.uri(), "m", "k"),
        ],
        1,
        true,
    );
    let secret = fixture.context.verifier.create(CreateKey::default()).unwrap();

    let outcome = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), Some(&secret))
        .await
        .unwrap();
    assert_eq!(outcome.backend, "b");
    assert_eq!(outcome.sections["原文"], "hello world");

    let a = fixture.context.registry.snapshot("a").unwrap().metrics;
    let b = fixture.context.registry.snapshot("b").unwrap().metrics;
    assert_eq!(a.failed_requests, 1);
    assert_eq!(b.successful_requests, 1);
    assert_eq!(a.active_connections, 0);
    assert_eq!(b.active_connections, 0);
}

#[tokio::test]
async fn unhealthy_pool_yields_no_backend_without_metering() {
    let fixture = fixture(
        vec![BackendConfig::new("a", "http://127.0.0.1:9", "m", "k")],
        2,
        false,
    );
    fixture.context.registry.disable("a");

    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoBackend));
    // No credential was consumed and no temp files remain.
    assert_eq!(fixture.context.verifier.store().list(true).unwrap().len(), 0);
    assert_eq!(temp_file_count(&fixture), 0);
}

#[tokio::test]
async fn compliant_wav_passes_through_and_is_reaped_on_exit() {
    let server = MockServer::start().await;
    chat_endpoint(&server, chat_reply(REPLY)).await;

    let fixture =
        fixture(vec![BackendConfig::new("a", server.uri(), "m", "k")], 0, false);

    let outcome = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap();
    assert_eq!(outcome.backend, "a");
    assert!(outcome.duration_seconds >= 0.0);
    // Passthrough ran no transcode and everything was deleted on exit.
    assert_eq!(fixture.context.normalizer.stats().total_conversions, 0);
    assert_eq!(temp_file_count(&fixture), 0);
}

#[tokio::test]
async fn parsed_sections_and_raw_text_reach_the_caller() {
    let server = MockServer::start().await;
    chat_endpoint(&server, chat_reply(REPLY)).await;

    let fixture =
        fixture(vec![BackendConfig::new("a", server.uri(), "m", "k")], 0, false);
    let outcome = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap();

    assert_eq!(outcome.sections["原文"], "hello world");
    assert_eq!(outcome.sections["英文"], "hello world");
    assert_eq!(outcome.sections["日文"], "こんにちは");
    assert_eq!(outcome.sections[RAW_TEXT_KEY], REPLY);
}

#[tokio::test]
async fn every_attempt_failing_reports_all_backends_failed() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    chat_endpoint(&server_a, ResponseTemplate::new(500)).await;
    chat_endpoint(&server_b, ResponseTemplate::new(502)).await;

    let fixture = fixture(
        vec![
            BackendConfig::new("a", server_a.uri(), "m", "k"),
            BackendConfig::new("b", server_b.uri(), "m", "k"),
        ],
        2,
        false,
    );

    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap_err();
    let Error::AllBackendsFailed { backend, message } = err else {
        panic!("expected AllBackendsFailed, got {err}");
    };
    // Attempts: a, b, a — the last failure names a.
    assert_eq!(backend, "a");
    assert!(message.contains("500"));

    let a = fixture.context.registry.snapshot("a").unwrap().metrics;
    let b = fixture.context.registry.snapshot("b").unwrap().metrics;
    assert_eq!(a.failed_requests + b.failed_requests, 3);
    assert_eq!(a.active_connections, 0);
    assert_eq!(b.active_connections, 0);
    assert_eq!(temp_file_count(&fixture), 0);
}

#[tokio::test]
async fn retries_disabled_surface_the_upstream_error() {
    let server = MockServer::start().await;
    chat_endpoint(&server, ResponseTemplate::new(500)).await;

    let fixture =
        fixture(vec![BackendConfig::new("a", server.uri(), "m", "k")], 0, false);
    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap_err();
    let Error::Upstream { status, .. } = err else {
        panic!("expected Upstream, got {err}");
    };
    assert_eq!(status, Some(500));
}

#[tokio::test]
async fn missing_credential_is_unauthorized_before_any_work() {
    let fixture = fixture(
        vec![BackendConfig::new("a", "http://127.0.0.1:9", "m", "k")],
        0,
        true,
    );
    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(temp_file_count(&fixture), 0);
}

#[tokio::test]
async fn revoked_credential_is_unauthorized() {
    let server = MockServer::start().await;
    chat_endpoint(&server, chat_reply(REPLY)).await;

    let fixture =
        fixture(vec![BackendConfig::new("a", server.uri(), "m", "k")], 0, true);
    let secret = fixture.context.verifier.create(CreateKey::default()).unwrap();
    fixture.context.verifier.revoke(&secret).unwrap();

    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), Some(&secret))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn invalid_upload_is_rejected_without_touching_backends() {
    let fixture = fixture(
        vec![BackendConfig::new("a", "http://127.0.0.1:9", "m", "k")],
        0,
        false,
    );
    let upload = AudioUpload { filename: "notes.txt".to_string(), data: vec![1, 2, 3] };
    let err = fixture
        .context
        .dispatcher
        .handle(upload, DispatchRequest::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUpload(_)));
    assert_eq!(fixture.context.registry.snapshot("a").unwrap().metrics.total_requests, 0);
}

#[tokio::test]
async fn expired_deadline_times_out_instead_of_calling_upstream() {
    let server = MockServer::start().await;
    // Upstream delays well past the deadline.
    chat_endpoint(
        &server,
        chat_reply(REPLY).set_delay(Duration::from_secs(5)),
    )
    .await;

    let fixture =
        fixture(vec![BackendConfig::new("a", server.uri(), "m", "k")], 0, false);
    let request = DispatchRequest {
        deadline: Some(Duration::from_millis(50)),
        ..DispatchRequest::default()
    };
    let err = fixture
        .context
        .dispatcher
        .handle(wav_upload(), request, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    let metrics = fixture.context.registry.snapshot("a").unwrap().metrics;
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test]
async fn single_backend_mode_dispatches_without_the_selector() {
    let server = MockServer::start().await;
    chat_endpoint(&server, chat_reply(REPLY)).await;

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database_path: dir.path().join("db").join("keys.db"),
        temp_dir: Some(dir.path().join("tmp")),
        backend_url: server.uri(),
        auth_enabled: false,
        max_retries: 0,
        ..Settings::default()
    };
    std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
    let context = AppContext::from_settings(settings).unwrap();
    assert_eq!(context.dispatcher.single_backend(), Some("default"));

    let outcome = context
        .dispatcher
        .handle(wav_upload(), DispatchRequest::default(), None)
        .await
        .unwrap();
    assert_eq!(outcome.backend, "default");

    // Metrics are tracked even without the selector.
    let metrics = context.registry.snapshot("default").unwrap().metrics;
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test]
async fn consistent_hash_key_pins_the_backend() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    chat_endpoint(&server_a, chat_reply(REPLY)).await;
    chat_endpoint(&server_b, chat_reply(REPLY)).await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
    let settings = Settings {
        database_path: dir.path().join("db").join("keys.db"),
        temp_dir: Some(dir.path().join("tmp")),
        llm_backends: Some(vec![
            BackendConfig::new("a", server_a.uri(), "m", "k"),
            BackendConfig::new("b", server_b.uri(), "m", "k"),
        ]),
        load_balance_enabled: Some(true),
        load_balance_strategy: "consistent_hash".to_string(),
        auth_enabled: false,
        ..Settings::default()
    };
    let context = AppContext::from_settings(settings).unwrap();

    let request = || DispatchRequest {
        request_key: Some("tenant-7".to_string()),
        ..DispatchRequest::default()
    };
    let first = context
        .dispatcher
        .handle(wav_upload(), request(), None)
        .await
        .unwrap()
        .backend;
    for _ in 0..3 {
        let next = context
            .dispatcher
            .handle(wav_upload(), request(), None)
            .await
            .unwrap()
            .backend;
        assert_eq!(next, first);
    }
}
