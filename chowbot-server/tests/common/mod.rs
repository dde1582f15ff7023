//! Shared test doubles and setup for engine tests.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chowbot_core::models::{FlowData, NewProduct, OrderDraft, Product, Session};
use chowbot_core::seed::seed_catalog;
use chowbot_core::store::{Catalog, MemoryStore, SessionStore};
use chowbot_core::{
    ChatMessage, DeliveryError, GenerationError, Messenger, ServiceKind, Step, TextGenerator,
};
use chowbot_server::context::{BotContext, BotSettings};

// ============================================================================
// Messenger double
// ============================================================================

/// Records every delivered message; can be told to fail for some recipients.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMessenger {
    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn recover(&self, recipient: &str) {
        self.failing.lock().unwrap().remove(recipient);
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last_to(&self, recipient: &str) -> Option<String> {
        self.sent_to(recipient).pop()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(recipient) {
            return Err(DeliveryError::RetryExhausted {
                attempts: 3,
                last: "API error 503: unavailable".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

// ============================================================================
// Generator double
// ============================================================================

/// Pops scripted replies in order; an empty script behaves like an
/// unreachable API.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GenerationError::RetryExhausted {
                attempts: 3,
                last: "connection refused".to_string(),
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Setup
// ============================================================================

pub struct Harness {
    pub ctx: BotContext,
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub generator: Arc<ScriptedGenerator>,
}

impl Harness {
    pub async fn product(&self, name: &str) -> Product {
        self.store
            .find_by_name(name)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("product {name} should exist"))
    }

    pub async fn session(&self, user_id: &str) -> Option<Session> {
        self.store.get(user_id).await.unwrap()
    }

    /// Store an order-flow session at `step` holding `draft`.
    pub async fn order_session(&self, user_id: &str, step: Step, draft: OrderDraft) {
        let mut session = Session::new(user_id, step, Some(ServiceKind::Order));
        session.data = FlowData::Order(draft);
        self.store.put_session(session).await;
    }

    pub async fn add_product(&self, name: &str, price: f64, stock: i32) -> Product {
        self.store
            .insert_product(NewProduct {
                name: name.to_string(),
                description: String::new(),
                price,
                stock,
                is_available: true,
                position: 100,
            })
            .await
            .unwrap()
    }
}

/// Engine over a seeded in-memory store with default settings.
pub async fn harness() -> Harness {
    harness_with(BotSettings::default()).await
}

pub async fn harness_with(settings: BotSettings) -> Harness {
    let store = Arc::new(MemoryStore::new(Duration::from_secs(3600)));
    seed_catalog(store.as_ref()).await.unwrap();

    let messenger = Arc::new(RecordingMessenger::default());
    let generator = Arc::new(ScriptedGenerator::default());
    let ctx = BotContext::new(store.clone(), generator.clone(), messenger.clone(), settings);

    Harness {
        ctx,
        store,
        messenger,
        generator,
    }
}

pub fn extraction_reply(items: &[(&str, i64)]) -> String {
    let items: Vec<_> = items
        .iter()
        .map(|(name, qty)| serde_json::json!({ "product": name, "quantity": qty }))
        .collect();
    serde_json::json!({ "items": items }).to_string()
}
