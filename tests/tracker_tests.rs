use std::net::SocketAddr;
use std::time::Duration;

use metrics_tracker::{CloudEnv, Tracker};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

// Nothing listens on the discard port; connections are refused immediately.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/api/v1/track";
const DEAD_BASE: &str = "http://127.0.0.1:9";

// Tests share one process; only the first call installs the subscriber.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Serves exactly one HTTP exchange and hands back the raw request bytes.
async fn serve_once(response: String) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            // POST bodies end with the serialized event; GETs end at the header block.
            if text.contains("\"runtime\"") || (text.starts_with("GET") && text.contains("\r\n\r\n"))
            {
                break;
            }
        }
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        socket.flush().await.expect("flush response");
        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    (addr, rx)
}

#[tokio::test]
async fn test_track_survives_unreachable_endpoint() {
    init_logging();
    let tracker = Tracker::new(CloudEnv::default(), "my-repo")
        .with_endpoint(DEAD_ENDPOINT)
        .with_descriptor_base(DEAD_BASE);

    // Must complete without panicking; all failures are logged only.
    tokio::time::timeout(Duration::from_secs(30), tracker.track())
        .await
        .expect("track() should return despite the dead endpoint");
}

#[tokio::test]
async fn test_unreachable_descriptor_omits_config() {
    init_logging();
    let tracker = Tracker::new(CloudEnv::default(), "my-repo")
        .with_endpoint(DEAD_ENDPOINT)
        .with_descriptor_base(DEAD_BASE);

    let event = tracker.build_payload().await;

    assert!(event.config.is_none(), "Unreachable descriptor must be skipped");
    assert!(!event.date_sent.is_empty());
    assert_eq!(event.runtime, "swift");
}

#[tokio::test]
async fn test_track_posts_event_to_endpoint() {
    init_logging();
    let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 20\r\nconnection: close\r\n\r\n{\"status\":\"created\"}";
    let (addr, request_rx) = serve_once(response.to_string()).await;

    let tracker = Tracker::new(CloudEnv::default(), "my-repo")
        .with_code_version("1.2.3")
        .with_endpoint(format!("http://{}/api/v1/track", addr))
        .with_descriptor_base(DEAD_BASE);

    tokio::time::timeout(Duration::from_secs(30), tracker.track())
        .await
        .expect("track() should complete");

    let request = tokio::time::timeout(Duration::from_secs(5), request_rx)
        .await
        .expect("server should see the request")
        .expect("request captured");

    assert!(
        request.starts_with("POST /api/v1/track"),
        "Expected POST to the tracking path, got: {}",
        request.lines().next().unwrap_or_default()
    );
    let content_type_headers: Vec<&str> = request
        .split("\r\n\r\n")
        .next()
        .unwrap_or_default()
        .lines()
        .filter(|line| line.to_ascii_lowercase().starts_with("content-type:"))
        .collect();
    assert_eq!(
        content_type_headers,
        vec!["content-type: application/json; charset=utf-8"],
        "Exactly one Content-Type header, with charset"
    );
    assert!(request.contains("\"runtime\":\"swift\""));
    assert!(request.contains("\"code_version\":\"1.2.3\""));
    assert!(request.contains("\"date_sent\""));
}

#[tokio::test]
async fn test_non_2xx_response_is_swallowed() {
    init_logging();
    let response = "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    let (addr, _request_rx) = serve_once(response.to_string()).await;

    let tracker = Tracker::new(CloudEnv::default(), "my-repo")
        .with_endpoint(format!("http://{}/api/v1/track", addr))
        .with_descriptor_base(DEAD_BASE);

    // A failing service must never propagate to the caller.
    tokio::time::timeout(Duration::from_secs(30), tracker.track())
        .await
        .expect("track() should return despite the 500");
}

#[tokio::test]
async fn test_descriptor_fetch_populates_config() {
    init_logging();
    let yaml = "id: my-repo\nruntimes:\n  - swift\nevent_id: conf-2017\n";
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        yaml.len(),
        yaml
    );
    let (addr, request_rx) = serve_once(response).await;

    let tracker = Tracker::new(CloudEnv::default(), "my-repo")
        .with_organization("MyOrg")
        .with_endpoint(DEAD_ENDPOINT)
        .with_descriptor_base(format!("http://{}", addr));

    let event = tokio::time::timeout(Duration::from_secs(30), tracker.build_payload())
        .await
        .expect("build_payload should complete");

    let request = tokio::time::timeout(Duration::from_secs(5), request_rx)
        .await
        .expect("server should see the request")
        .expect("request captured");
    assert!(
        request.starts_with("GET /MyOrg/my-repo/master/repository.yaml"),
        "Expected descriptor GET, got: {}",
        request.lines().next().unwrap_or_default()
    );

    let config = event.config.as_ref().expect("config should be populated");
    assert_eq!(config.repository_id.as_deref(), Some("my-repo"));
    assert_eq!(config.target_runtimes, Some(vec!["swift".to_string()]));
    assert_eq!(config.event_id.as_deref(), Some("conf-2017"));
}
