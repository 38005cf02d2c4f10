#![cfg(feature = "remote-filler")]

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;

use ghosttype::config::FillerSettings;
use ghosttype::filler::remote::RemoteFillerSource;
use ghosttype::filler::{source_from_settings, FillerPrompt, FillerSource};
use ghosttype::{CancellationToken, FillerError};

struct Reply {
    status: StatusCode,
    body: &'static str,
    delay: Duration,
    requests: mpsc::Sender<String>,
}

async fn filler(
    State(reply): State<Arc<Reply>>,
    body: String,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], &'static str) {
    let _ = reply.requests.send(body);
    tokio::time::sleep(reply.delay).await;
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
}

/// Serve `POST /filler` with a canned reply. Request bodies come back over the channel.
fn serve(
    status: StatusCode,
    body: &'static str,
    delay: Duration,
) -> (String, mpsc::Receiver<String>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    let reply = Arc::new(Reply {
        status,
        body,
        delay,
        requests: tx,
    });

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = Router::new()
                .route("/filler", post(filler))
                .with_state(reply);
            axum::serve(listener, app).await.unwrap();
        });
    });

    (format!("http://{addr}/filler"), rx)
}

fn prompt() -> FillerPrompt {
    let visible: Vec<char> = "The meeting ran long, so".chars().collect();
    FillerPrompt::from_visible(&visible)
}

#[test]
fn returns_the_sanitized_phrase_and_sends_the_license_key() {
    let (endpoint, requests) = serve(
        StatusCode::OK,
        r#"{"filler":"  \"we could maybe\"  "}"#,
        Duration::ZERO,
    );
    let source =
        RemoteFillerSource::new(endpoint, Some("k-123".to_string()), Duration::from_secs(5))
            .unwrap();

    let phrase = source.fetch(&prompt(), &CancellationToken::new()).unwrap();
    assert_eq!(phrase, "we could maybe");

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(request.contains(r#""licenseKey":"k-123""#), "{request}");
    assert!(request.contains("The meeting ran long, so"), "{request}");
}

#[test]
fn non_ok_status_is_reported() {
    let (endpoint, _requests) = serve(StatusCode::INTERNAL_SERVER_ERROR, "{}", Duration::ZERO);
    let source = RemoteFillerSource::new(endpoint, None, Duration::from_secs(5)).unwrap();

    let err = source
        .fetch(&prompt(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, FillerError::Status(500)), "{err:?}");
}

#[test]
fn malformed_body_is_reported() {
    let (endpoint, _requests) = serve(StatusCode::OK, "not json", Duration::ZERO);
    let source = RemoteFillerSource::new(endpoint, None, Duration::from_secs(5)).unwrap();

    let err = source
        .fetch(&prompt(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, FillerError::MalformedBody(_)), "{err:?}");
}

#[test]
fn slow_service_times_out() {
    let (endpoint, _requests) =
        serve(StatusCode::OK, r#"{"filler":"late"}"#, Duration::from_secs(3));
    let source = RemoteFillerSource::new(endpoint, None, Duration::from_millis(200)).unwrap();

    let err = source
        .fetch(&prompt(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, FillerError::Timeout(_)), "{err:?}");
}

#[test]
fn stopped_session_cancels_the_request() {
    let (endpoint, _requests) =
        serve(StatusCode::OK, r#"{"filler":"late"}"#, Duration::from_secs(3));
    let source = RemoteFillerSource::new(endpoint, None, Duration::from_secs(5)).unwrap();
    let token = CancellationToken::new();
    token.stop();

    let err = source.fetch(&prompt(), &token).unwrap_err();
    assert!(matches!(err, FillerError::Cancelled), "{err:?}");
}

#[test]
fn missing_endpoint_falls_back_to_offline_source() {
    let source = source_from_settings(&FillerSettings {
        endpoint: None,
        ..FillerSettings::default()
    });
    let err = source
        .fetch(&prompt(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, FillerError::Disabled), "{err:?}");
}
