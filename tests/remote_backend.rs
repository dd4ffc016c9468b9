use std::{
    net::TcpListener,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use httpmock::MockServer;
use reqwest::Url;
use ritratto::application::render::{
    BackendDispatcher, CoordinatorSettings, Dialect, OutputFormat, RemoteBackend, RemoteSettings,
    RenderBackend, RenderConsumer, RenderCoordinator, RenderError, RenderRequest, Theme,
};
use tokio::sync::mpsc;

const SOURCE: &str = "@startuml\nAlice -> Bob: hello\n@enduml";

fn settings(server: &MockServer) -> RemoteSettings {
    let base_url = Url::parse(&server.base_url()).expect("mock server url");
    let mut settings = RemoteSettings::new(base_url);
    settings.timeout = Duration::from_millis(500);
    settings.retry_delay = Duration::from_millis(20);
    settings
}

fn plantuml() -> RenderRequest {
    RenderRequest::new(SOURCE, Dialect::PlantUml, Theme::Default)
}

#[tokio::test]
async fn successful_render_returns_body() {
    let server = MockServer::start();
    let backend = RemoteBackend::new(settings(&server)).expect("client builds");
    let expected_path = backend
        .request_url(Dialect::PlantUml, SOURCE)
        .expect("url")
        .path()
        .to_string();

    let mock = server.mock(|when, then| {
        when.method("GET")
            .path(expected_path.as_str())
            .header("accept", "image/svg+xml");
        then.status(200)
            .header("content-type", "image/svg+xml")
            .body("<svg xmlns=\"http://www.w3.org/2000/svg\"><text>Alice</text></svg>");
    });

    let artifact = backend.render(&plantuml()).await.expect("render succeeds");
    assert!(artifact.starts_with("<svg"));
    assert!(artifact.contains("Alice"));
    mock.assert();
}

#[tokio::test]
async fn server_error_is_retried_until_budget_is_spent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path_includes("/plantuml/svg/");
        then.status(500).body("Syntax Error? (Assumed diagram type: sequence) line 2");
    });

    let backend = RemoteBackend::new(settings(&server)).expect("client builds");
    let started = Instant::now();
    let err = backend.render(&plantuml()).await.expect_err("server error");

    match &err {
        RenderError::Http {
            status,
            body,
            attempts,
        } => {
            assert_eq!(*status, 500);
            assert_eq!(*attempts, 3);
            assert!(body.contains("Syntax Error?"));
        }
        other => panic!("expected http error, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("Syntax Error?"), "{message}");
    assert!(
        started.elapsed() >= Duration::from_millis(40),
        "two retry delays must elapse between three attempts"
    );
    mock.assert_hits(3);
}

#[tokio::test]
async fn single_attempt_budget_does_not_retry() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path_includes("/graphviz/svg/");
        then.status(400).body("Error: syntax error in line 1 near '->'");
    });

    let mut settings = settings(&server);
    settings.max_retries = NonZeroU32::MIN;
    let backend = RemoteBackend::new(settings).expect("client builds");

    let err = backend
        .render(&RenderRequest::new("digraph { -> }", Dialect::Graphviz, Theme::Default))
        .await
        .expect_err("bad request");

    assert!(matches!(err, RenderError::Http { status: 400, attempts: 1, .. }));
    mock.assert();
}

#[tokio::test]
async fn timeout_fails_after_one_attempt() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path_includes("/plantuml/svg/");
        then.status(200)
            .delay(Duration::from_secs(2))
            .body("<svg></svg>");
    });

    let mut settings = settings(&server);
    settings.timeout = Duration::from_millis(150);
    let backend = RemoteBackend::new(settings).expect("client builds");

    let started = Instant::now();
    let err = backend.render(&plantuml()).await.expect_err("timed out");

    assert_eq!(err, RenderError::Timeout { timeout_ms: 150 });
    assert!(err.to_string().contains("150ms"));
    assert!(started.elapsed() < Duration::from_secs(2));
    mock.assert();
}

#[tokio::test]
async fn empty_success_body_is_a_soft_failure() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path_includes("/plantuml/svg/");
        then.status(200).body("");
    });

    let backend = RemoteBackend::new(settings(&server)).expect("client builds");
    let err = backend.render(&plantuml()).await.expect_err("empty body");
    assert!(matches!(err, RenderError::SoftFailure { .. }), "{err:?}");
}

#[tokio::test]
async fn binary_formats_are_base64_encoded() {
    let png = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path_includes("/plantuml/png/")
            .header("accept", "image/png");
        then.status(200).body(png);
    });

    let mut settings = settings(&server);
    settings.format = OutputFormat::Png;
    let backend = RemoteBackend::new(settings).expect("client builds");

    let artifact = backend.render(&plantuml()).await.expect("png render");
    assert_eq!(STANDARD.decode(artifact).expect("base64"), png);
    mock.assert();
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    // Bind and drop a listener to get a port nobody is serving.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut settings = RemoteSettings::new(Url::parse(&format!("http://{addr}")).expect("url"));
    settings.retry_delay = Duration::from_millis(5);
    settings.max_retries = NonZeroU32::new(2).expect("non-zero");
    let backend = RemoteBackend::new(settings).expect("client builds");

    let err = backend.render(&plantuml()).await.expect_err("connection refused");
    assert!(
        matches!(err, RenderError::Transport { attempts: 2, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn dropped_connections_are_retried_until_budget_is_spent() {
    // Accept every connection and close it before a response is written.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            accepted.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let mut settings = RemoteSettings::new(Url::parse(&format!("http://{addr}")).expect("url"));
    settings.retry_delay = Duration::from_millis(5);
    settings.max_retries = NonZeroU32::new(3).expect("non-zero");
    let backend = RemoteBackend::new(settings).expect("client builds");

    let err = backend.render(&plantuml()).await.expect_err("connection dropped");
    assert!(
        matches!(err, RenderError::Transport { attempts: 3, .. }),
        "{err:?}"
    );
    assert_eq!(connections.load(Ordering::SeqCst), 3);
}

struct ErrorChannel(mpsc::UnboundedSender<String>);

impl RenderConsumer for ErrorChannel {
    fn on_error(&self, message: Option<&str>) {
        if let Some(message) = message {
            let _ = self.0.send(message.to_string());
        }
    }

    fn on_artifact_ready(&self, _artifact: &str) {}
}

async fn next_error(errors: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .expect("error published in time")
        .expect("consumer channel open")
}

#[tokio::test]
async fn coordinator_publishes_remote_failures_verbatim() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method("GET").path_includes("/plantuml/svg/");
        then.status(500).body("Syntax Error? (Assumed diagram type: sequence) line 2");
    });
    server.mock(|when, then| {
        when.method("GET").path_includes("/graphviz/svg/");
        then.status(200)
            .delay(Duration::from_secs(2))
            .body("<svg></svg>");
    });

    let mut remote_settings = settings(&server);
    remote_settings.timeout = Duration::from_millis(150);
    let remote: Arc<dyn RenderBackend> =
        Arc::new(RemoteBackend::new(remote_settings).expect("client builds"));
    let dispatcher = BackendDispatcher::new(Dialect::Mermaid, remote.clone(), remote);
    let coordinator_settings = CoordinatorSettings {
        debounce: Duration::from_millis(20),
        ..CoordinatorSettings::default()
    };
    let (tx, mut errors) = mpsc::unbounded_channel();
    let handle = RenderCoordinator::spawn(coordinator_settings, dispatcher, Arc::new(ErrorChannel(tx)));

    handle.edit(plantuml()).expect("running");
    let message = next_error(&mut errors).await;
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("Syntax Error? (Assumed diagram type: sequence) line 2"), "{message}");
    failing.assert_hits(3);

    handle
        .edit(RenderRequest::new("digraph { a -> b }", Dialect::Graphviz, Theme::Default))
        .expect("running");
    let message = next_error(&mut errors).await;
    assert!(message.contains("150ms"), "{message}");

    handle.shutdown().await;
}
