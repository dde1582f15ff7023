//! Outbound messaging: delivers replies to users through the WhatsApp Cloud API
//!
//! `Messenger` is the only outbound seam the conversation engine sees. The
//! `WhatsAppMessenger` sends synchronously under a retry policy;
//! `QueuedMessenger` optionally puts a bounded queue with a single consumer
//! task in front of any messenger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::MessagingConfig;
use crate::retry::{RetryPolicy, Transient};

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Messaging API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Send queue is closed")]
    QueueClosed,

    #[error("All {attempts} delivery attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl Transient for DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Http(e) => !e.is_builder(),
            DeliveryError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// WhatsAppMessenger
// ============================================================================

#[derive(Debug, Clone)]
pub struct WhatsAppMessenger {
    client: Client,
    access_token: String,
    phone_number_id: String,
    base_url: String,
    retry: RetryPolicy,
}

impl WhatsAppMessenger {
    pub fn new(config: &MessagingConfig) -> Result<Self, DeliveryError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a messenger with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &MessagingConfig, base_url: String) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
        })
    }

    async fn send_once(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let to = recipient.strip_prefix('+').unwrap_or(recipient);

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": text }
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Messenger for WhatsAppMessenger {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let result = self
            .retry
            .run("send_message", || self.send_once(recipient, text))
            .await;

        match result {
            Err(e) if e.is_transient() => Err(DeliveryError::RetryExhausted {
                attempts: self.retry.max_attempts,
                last: e.to_string(),
            }),
            other => other,
        }
    }
}

// ============================================================================
// QueuedMessenger
// ============================================================================

struct SendJob {
    recipient: String,
    text: String,
}

/// Fire-and-forget front for another messenger. One consumer task drains the
/// queue in order, so messages to the same recipient keep their order.
#[derive(Clone)]
pub struct QueuedMessenger {
    tx: mpsc::Sender<SendJob>,
}

impl QueuedMessenger {
    /// Spawn the consumer task. It drains what is already queued and exits
    /// when the shutdown signal fires or every sender is dropped.
    pub fn spawn(
        inner: Arc<dyn Messenger>,
        capacity: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SendJob>(capacity.max(1));

        let handle = tokio::spawn(async move {
            tracing::info!("Send queue worker started (capacity: {})", capacity);
            loop {
                tokio::select! {
                    job = rx.recv() => match job {
                        Some(job) => deliver(inner.as_ref(), job).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        rx.close();
                        while let Some(job) = rx.recv().await {
                            deliver(inner.as_ref(), job).await;
                        }
                        break;
                    }
                }
            }
            tracing::info!("Send queue worker stopped");
        });

        (Self { tx }, handle)
    }
}

async fn deliver(inner: &dyn Messenger, job: SendJob) {
    if let Err(e) = inner.send_message(&job.recipient, &job.text).await {
        tracing::error!(recipient = %job.recipient, error = %e, "Queued message delivery failed");
    }
}

#[async_trait]
impl Messenger for QueuedMessenger {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(SendJob {
                recipient: recipient.to_string(),
                text: text.to_string(),
            })
            .await
            .map_err(|_| DeliveryError::QueueClosed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
