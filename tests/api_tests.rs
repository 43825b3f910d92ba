use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use peerlock::api::{api, paths};
use peerlock::node::{PeerId, PeerNode, PeerStatus};
use peerlock::registry::StaticRegistry;
use peerlock::settings::{Settings, TimingSettings};
use peerlock::transport::InMemoryNetwork;

fn node(heartbeat: Duration) -> Arc<PeerNode> {
    let settings = Settings {
        peer_id: PeerId::from("solo"),
        listen_address: "127.0.0.1".to_string(),
        listen_port_http: 0,
        listen_port_peer: 0,
        advertise_address: SocketAddr::from(([127, 0, 0, 1], 9999)),
        topology: HashMap::new(),
        timing: TimingSettings {
            heartbeat_interval: heartbeat,
            cleanup_interval: Duration::from_millis(50),
            eviction_timeout: heartbeat * 3,
            rpc_timeout: Duration::from_millis(200),
            max_hold_ticks: 100,
            tick: Duration::from_millis(50),
            retry_timeout: Duration::from_millis(500),
        },
    };
    Arc::new(PeerNode::new(
        settings,
        Arc::new(StaticRegistry::default()),
        Arc::new(InMemoryNetwork::default()),
        None,
    ))
}

async fn call(app: &Router, method: &str, path: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_and_about() {
    let app = api(node(Duration::from_millis(20)));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(paths::base::HEALTH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");

    let (status, body) = call(&app, "GET", paths::base::ABOUT).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "peerlock");
}

#[tokio::test]
async fn test_status_of_an_idle_peer() {
    let app = api(node(Duration::from_millis(20)));

    let (status, body) = call(&app, "GET", paths::STATUS).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["peer_id"], "solo");
    assert_eq!(body["status"], "FREE");
    assert!(body["transport"].is_null());
}

#[tokio::test]
async fn test_release_without_holding_conflicts() {
    let app = api(node(Duration::from_millis(20)));

    let (status, body) = call(&app, "POST", paths::resource::RELEASE).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "state_error");
    assert_eq!(body["error"]["code"], 409);
}

#[tokio::test]
async fn test_acquire_during_warm_up_is_refused() {
    let app = api(node(Duration::from_millis(500)));

    let (status, body) = call(&app, "POST", paths::resource::ACQUIRE).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "state_error");
}

#[tokio::test]
async fn test_acquire_hold_and_release() {
    let node = node(Duration::from_millis(20));
    let app = api(node.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;

    let (status, body) = call(&app, "POST", paths::resource::ACQUIRE).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["peer_id"], "solo");

    let (status, _) = call(&app, "POST", paths::resource::ACQUIRE).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while node.engine().status() != PeerStatus::Holding {
        assert!(tokio::time::Instant::now() < deadline, "never started holding");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = call(&app, "GET", paths::PEERS).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["holder"], "solo");

    let (status, body) = call(&app, "POST", paths::resource::RELEASE).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FREE");
}

#[tokio::test]
async fn test_leave_stops_new_requests() {
    let app = api(node(Duration::from_millis(20)));
    tokio::time::sleep(Duration::from_millis(60)).await;

    let (status, _) = call(&app, "POST", paths::LEAVE).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", paths::resource::ACQUIRE).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "state_error");

    let (status, _) = call(&app, "POST", paths::LEAVE).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
