//! HTTP API tests against an in-process router and loopback transport

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use scanrtc_core::loopback::LoopbackTransport;
use scanrtc_core::{Detection, Detector, PixelBuffer, SessionManager};
use scanrtc_signaling::SignalingServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::assert_ok;
use tower::ServiceExt;

#[derive(Debug)]
struct NoSymbols;

impl Detector for NoSymbols {
    fn detect(&self, _frame: &PixelBuffer) -> Vec<Detection> {
        Vec::new()
    }
}

struct TestApp {
    transport: Arc<LoopbackTransport>,
    manager: SessionManager,
    router: Router,
}

fn static_dir() -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "scanrtc-static-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(dir.join("assets")).unwrap();
    std::fs::write(dir.join("index.html"), "<html>scanner</html>").unwrap();
    std::fs::write(dir.join("assets").join("app.js"), "console.log('scan');").unwrap();
    dir
}

fn app() -> TestApp {
    let transport = Arc::new(LoopbackTransport::new());
    let manager = SessionManager::new(transport.clone(), Arc::new(NoSymbols));
    let remote: SocketAddr = "192.0.2.10:40000".parse().unwrap();
    let router = SignalingServer::new(manager.clone(), static_dir())
        .router()
        .layer(MockConnectInfo(remote));
    TestApp {
        transport,
        manager,
        router,
    }
}

fn offer_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/offer")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = assert_ok!(to_bytes(response.into_body(), usize::MAX).await);
    assert_ok!(serde_json::from_slice(&bytes))
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = assert_ok!(to_bytes(response.into_body(), usize::MAX).await);
    assert_ok!(String::from_utf8(bytes.to_vec()))
}

const VALID_OFFER: &str = r#"{"sdp":"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n","type":"offer"}"#;

#[tokio::test]
async fn test_offer_returns_answer_and_creates_session() {
    let app = app();

    let response = app.router.clone().oneshot(offer_request(VALID_OFFER)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let answer = body_json(response).await;
    assert_eq!(answer["type"], "answer");
    assert!(answer["sdp"].as_str().unwrap().starts_with("v=0"));

    let peer = app.transport.next_peer().unwrap();
    assert!(peer.remote_offer().is_some());

    let response = app.router.oneshot(get("/api/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sessions = body_json(response).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], peer.session_id().to_string());
    assert_eq!(sessions[0]["state"], "negotiating");
    assert_eq!(sessions[0]["frames_processed"], 0);
}

#[tokio::test]
async fn test_non_offer_type_is_rejected() {
    let app = app();
    let response = app
        .router
        .oneshot(offer_request(r#"{"sdp":"v=0\r\n","type":"answer"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("offer"));
    assert_eq!(app.transport.sessions_created(), 0);
}

#[tokio::test]
async fn test_malformed_sdp_is_rejected() {
    let app = app();
    let response = app
        .router
        .oneshot(offer_request(r#"{"sdp":"garbage","type":"offer"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.manager.sessions().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_a_client_error() {
    let app = app();

    let response = app.router.clone().oneshot(offer_request("{not json")).await.unwrap();
    assert!(response.status().is_client_error());

    let response = app.router.oneshot(offer_request(r#"{"type":"offer"}"#)).await.unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(app.transport.sessions_created(), 0);
}

#[tokio::test]
async fn test_transport_failure_is_a_server_error() {
    let app = app();
    app.transport.fail_next_session();

    let response = app.router.oneshot(offer_request(VALID_OFFER)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_offers_after_shutdown_are_unavailable() {
    let app = app();
    let report = app.manager.shutdown().await;
    assert_eq!(report.total(), 0);

    let response = app.router.oneshot(offer_request(VALID_OFFER)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_static_client_is_served() {
    let app = app();

    let response = app.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<html>scanner</html>");

    let response = app.router.clone().oneshot(get("/assets/app.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "console.log('scan');");

    let response = app.router.oneshot(get("/assets/missing.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
