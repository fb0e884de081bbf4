use api_gate::clock::ManualClock;
use api_gate::config::Config;
use api_gate::handlers::AppState;
use api_gate::server::create_app;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio_test::assert_ok;
use tower::ServiceExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock())).unwrap()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn get_hello() -> Request<Body> {
    Request::builder()
        .uri("/api/hello")
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_denied_request_logs_only_the_denial() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("api_gate=debug,tower_http=debug"))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );
    let _guard = tracing::subscriber::set_default(subscriber);

    let state = assert_ok!(AppState::with_clock(
        Config {
            rate_limit_api_max: 1,
            ..Config::default()
        },
        Arc::new(ManualClock::new(1_700_000_000_000)),
    ));
    let app = create_app(Arc::new(state));

    let response = app.clone().oneshot(get_hello()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let allowed = logs.take();
    assert!(allowed.contains("Incoming request"));
    assert!(allowed.contains("Request completed"));
    assert!(allowed.contains("started processing request"));
    assert!(!allowed.contains("Rate limit exceeded"));

    let response = app.oneshot(get_hello()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let denied = logs.take();
    let lines: Vec<&str> = denied.lines().collect();
    assert_eq!(lines.len(), 1, "unexpected log output: {}", denied);
    assert!(lines[0].contains("WARN"));
    assert!(lines[0].contains("Rate limit exceeded"));
    assert!(lines[0].contains("identifier=api"));
    assert!(lines[0].contains("reset_in_seconds=60"));
}
