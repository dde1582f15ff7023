//! Chowbot HTTP webhook transport
//!
//! Axum server that receives WhatsApp Cloud API webhooks and hands each
//! `(sender, text)` pair to the conversation router.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, body)`. The inner functions are
//! directly testable without the axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /           liveness text
//! - GET  /health     store health
//! - GET  /whatsapp   webhook verification handshake
//! - POST /whatsapp   inbound messages

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chowbot_core::config::HttpConfig;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::context::{BotContext, TurnOutcome};
use crate::router;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ctx: BotContext,
    pub verify_token: String,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/whatsapp", get(verify_handler).post(webhook_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Chowbot webhook listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Query string of the webhook verification handshake.
#[derive(Debug, Deserialize, Default)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(ctx: &BotContext) -> (StatusCode, serde_json::Value) {
    match ctx.sessions.ping().await {
        Ok(store) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Echo the challenge when the subscription mode and token match.
pub fn verify_inner(query: &VerifyQuery, expected_token: &str) -> (StatusCode, String) {
    let subscribed = query.mode.as_deref() == Some("subscribe");
    let token_ok = query.verify_token.as_deref() == Some(expected_token);

    match (&query.challenge, subscribed && token_ok) {
        (Some(challenge), true) => {
            tracing::info!("Webhook verified");
            (StatusCode::OK, challenge.clone())
        }
        _ => {
            tracing::warn!("Webhook verification rejected");
            (StatusCode::FORBIDDEN, "Verification failed".to_string())
        }
    }
}

/// Run every text message in the payload through the router, in order.
pub async fn webhook_inner(
    ctx: &BotContext,
    payload: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let messages = parse_webhook_payload(payload);
    let mut outcome = TurnOutcome::Ignored;

    for (sender, text) in messages {
        match router::handle_message(ctx, &sender, &text).await {
            Ok(result) => {
                tracing::debug!(user_id = %sender, outcome = result.as_str(), "Turn handled");
                outcome = result;
            }
            Err(e) => {
                tracing::error!(user_id = %sender, error = %e, "Turn failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({
                        "status": "error",
                        "error": e.to_string(),
                    }),
                );
            }
        }
    }

    (StatusCode::OK, serde_json::json!({ "status": outcome }))
}

// ============================================================================
// Axum handler wrappers (thin wrappers over the inner functions)
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, "Chowbot is running")
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn verify_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    verify_inner(&query, &state.verify_token)
}

pub async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let (status, body) = webhook_inner(&state.ctx, &payload).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Pull `(sender, text)` pairs out of a Cloud API webhook body.
///
/// Status callbacks and non-text messages are skipped.
pub fn parse_webhook_payload(payload: &serde_json::Value) -> Vec<(String, String)> {
    let mut messages = Vec::new();

    let Some(entries) = payload.get("entry").and_then(|e| e.as_array()) else {
        return messages;
    };

    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(|c| c.as_array()) else {
            continue;
        };
        for change in changes {
            let Some(inbound) = change
                .get("value")
                .and_then(|v| v.get("messages"))
                .and_then(|m| m.as_array())
            else {
                continue;
            };
            for message in inbound {
                let sender = message.get("from").and_then(|f| f.as_str());
                let text = message
                    .get("text")
                    .and_then(|t| t.get("body"))
                    .and_then(|b| b.as_str());
                if let (Some(sender), Some(text)) = (sender, text) {
                    if !sender.is_empty() && !text.trim().is_empty() {
                        messages.push((sender.to_string(), text.to_string()));
                    }
                }
            }
        }
    }

    messages
}

// ============================================================================
// Unit Tests
// ============================================================================
