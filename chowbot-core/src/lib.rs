pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod messaging;
pub mod models;
pub mod retry;
pub mod seed;
pub mod store;

pub use config::ChowbotConfig;
pub use error::ChowbotError;
pub use generation::{GenerationError, OpenAiChatClient, TextGenerator};
pub use messaging::{DeliveryError, Messenger, QueuedMessenger, WhatsAppMessenger};
pub use models::{
    ChatMessage, FlowData, NutritionChat, Order, OrderDraft, OrderItem, OrderStatus, Product,
    Role, ServiceKind, Session, SessionPatch, Step,
};
pub use retry::{RetryPolicy, Transient};
pub use store::{Catalog, MemoryStore, OrderStore, PgStore, SessionStore};
