use std::sync::Arc;

use chowbot_core::config::{NutritionConfig, OrderConfig};
use chowbot_core::store::{Catalog, OrderStore, SessionStore};
use chowbot_core::{ChowbotConfig, ChowbotError, Messenger, TextGenerator};
use serde::Serialize;

use crate::subsystems::extract::ItemExtractor;

/// Result of handling one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// First contact; welcome menu sent.
    New,
    /// Conversation continues; waiting for the user's next message.
    Awaiting,
    /// Nutrition reply sent.
    Sent,
    Ordered,
    Cancelled,
    Error,
    Ended,
    /// Nothing handled: the webhook carried no text message, or the turn
    /// duplicated a commit already in progress.
    Ignored,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::New => "new",
            TurnOutcome::Awaiting => "awaiting",
            TurnOutcome::Sent => "sent",
            TurnOutcome::Ordered => "ordered",
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::Error => "error",
            TurnOutcome::Ended => "ended",
            TurnOutcome::Ignored => "ignored",
        }
    }
}

/// Engine settings taken from the `[order]`, `[nutrition]` and `[generation]` sections.
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub order: OrderConfig,
    pub nutrition: NutritionConfig,
    pub temperature_extraction: f32,
    pub temperature_nutrition: f32,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            order: OrderConfig::default(),
            nutrition: NutritionConfig::default(),
            temperature_extraction: 0.0,
            temperature_nutrition: 0.7,
        }
    }
}

impl From<&ChowbotConfig> for BotSettings {
    fn from(config: &ChowbotConfig) -> Self {
        Self {
            order: config.order.clone(),
            nutrition: config.nutrition.clone(),
            temperature_extraction: config.generation.temperature_extraction,
            temperature_nutrition: config.generation.temperature_nutrition,
        }
    }
}

/// Explicitly constructed collaborators shared by every turn.
#[derive(Clone)]
pub struct BotContext {
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn Catalog>,
    pub orders: Arc<dyn OrderStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub messenger: Arc<dyn Messenger>,
    pub extractor: ItemExtractor,
    pub settings: BotSettings,
}

impl BotContext {
    /// Build a context where one backend serves sessions, catalog and orders.
    pub fn new<S>(
        store: Arc<S>,
        generator: Arc<dyn TextGenerator>,
        messenger: Arc<dyn Messenger>,
        settings: BotSettings,
    ) -> Self
    where
        S: SessionStore + Catalog + OrderStore + 'static,
    {
        let extractor = ItemExtractor::new(
            generator.clone(),
            settings.order.synonyms.clone(),
            settings.temperature_extraction,
        );
        Self {
            sessions: store.clone(),
            catalog: store.clone(),
            orders: store,
            generator,
            messenger,
            extractor,
            settings,
        }
    }

    /// Send a reply; exhausted delivery failures abort the turn.
    pub async fn reply(&self, user_id: &str, text: &str) -> Result<(), ChowbotError> {
        self.messenger.send_message(user_id, text).await?;
        Ok(())
    }
}
