//! HTTP tests for the webhook transport using axum `oneshot` dispatch.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chowbot_server::http::{build_router, webhook_inner, HttpState};
use chowbot_server::router::MSG_WELCOME;
use common::{harness, Harness};
use serde_json::json;
use tower::ServiceExt;

const VERIFY_TOKEN: &str = "verify-me";

fn state_for(h: &Harness) -> Arc<HttpState> {
    Arc::new(HttpState {
        ctx: h.ctx.clone(),
        verify_token: VERIFY_TOKEN.to_string(),
    })
}

fn inbound(from: &str, body: &str) -> serde_json::Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "contacts": [{ "wa_id": from }],
                    "messages": [{
                        "from": from,
                        "id": "wamid.HBgL",
                        "timestamp": "1718000000",
                        "type": "text",
                        "text": { "body": body }
                    }]
                }
            }]
        }]
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, payload: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let h = harness().await;
    let app = build_router(state_for(&h));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_verification_handshake() {
    let h = harness().await;
    let app = build_router(state_for(&h));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=8675309")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"8675309");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=8675309")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inbound_text_reaches_the_router() {
    let h = harness().await;
    let app = build_router(state_for(&h));

    let response = app
        .oneshot(post_json("/whatsapp", &inbound("2347000000001", "hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "new" }));
    assert_eq!(
        h.messenger.last_to("2347000000001").as_deref(),
        Some(MSG_WELCOME)
    );
}

#[tokio::test]
async fn test_status_callbacks_are_ignored() {
    let h = harness().await;
    let app = build_router(state_for(&h));
    let payload = json!({
        "entry": [{ "changes": [{ "value": { "statuses": [{ "status": "read" }] } }] }]
    });

    let response = app.oneshot(post_json("/whatsapp", &payload)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ignored" }));
    assert_eq!(h.messenger.count(), 0);
}

#[tokio::test]
async fn test_failed_turn_reports_server_error() {
    let h = harness().await;
    h.messenger.fail_for("2347000000002");

    let (status, body) = webhook_inner(&h.ctx, &inbound("2347000000002", "hi")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(h.session("2347000000002").await.is_none());
}
