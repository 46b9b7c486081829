//! ResendProvider against a local stub of the Resend API

use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use dei_common::config::ResendConfig;
use dei_mailer::transport::{EmailMessage, EmailProvider, ResendProvider, SendError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

/// Start a stub server; returns its address and the captured requests
async fn stub_server(status: StatusCode, response: Value) -> (SocketAddr, Captured) {
    let captured: Captured = Arc::default();
    let sink = captured.clone();

    let app = Router::new().route(
        "/emails",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            let response = response.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                sink.lock().unwrap().push((auth, body));
                (status, Json(response))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, captured)
}

fn provider(addr: SocketAddr) -> ResendProvider {
    ResendProvider::new(&ResendConfig {
        api_key: Some("re_test_key".to_string()),
        api_base_url: format!("http://{}", addr),
        from: "Daily Event Insurance <leads@dailyeventinsurance.com>".to_string(),
        reply_to: Some("partners@dailyeventinsurance.com".to_string()),
        timeout_secs: 5,
    })
    .unwrap()
}

fn message() -> EmailMessage {
    EmailMessage {
        to: vec!["owner@irontemple.example".to_string()],
        subject: "Welcome".to_string(),
        html: Some("<p>Hi Dana</p>".to_string()),
        text: Some("Hi Dana".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_send_posts_json_with_bearer_auth() {
    let (addr, captured) = stub_server(StatusCode::OK, json!({ "id": "re_123" })).await;

    let receipt = provider(addr).send(&message()).await.unwrap();
    assert_eq!(receipt.id, "re_123");

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer re_test_key"));
    assert_eq!(body["from"], "Daily Event Insurance <leads@dailyeventinsurance.com>");
    assert_eq!(body["to"], json!(["owner@irontemple.example"]));
    assert_eq!(body["subject"], "Welcome");
    assert_eq!(body["text"], "Hi Dana");
    assert_eq!(body["reply_to"], "partners@dailyeventinsurance.com");
    assert!(body.get("cc").is_none());
}

#[tokio::test]
async fn test_error_body_surfaces_in_send_error() {
    let (addr, _) = stub_server(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "name": "validation_error", "message": "Invalid `to` field" }),
    )
    .await;

    let err = provider(addr).send(&message()).await.unwrap_err();

    match &err {
        SendError::Provider { status, message } => {
            assert_eq!(*status, 422);
            assert_eq!(message, "validation_error: Invalid `to` field");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (addr, _) = stub_server(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "message": "Service temporarily unavailable" }),
    )
    .await;

    let err = provider(addr).send(&message()).await.unwrap_err();

    assert!(matches!(err, SendError::Provider { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = provider(addr).send(&message()).await.unwrap_err();

    assert!(matches!(err, SendError::Network(_)));
    assert!(err.is_retryable());
}
