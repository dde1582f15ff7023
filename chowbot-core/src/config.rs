use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct ChowbotConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub nutrition: NutritionConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// "postgres" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub temperature_extraction: f32,
    pub temperature_nutrition: f32,
    pub timeout_seconds: u64,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            temperature_extraction: 0.0,
            temperature_nutrition: 0.7,
            timeout_seconds: 30,
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms)
    }

    pub fn resolved_api_key(&self) -> String {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    #[serde(default = "default_graph_url")]
    pub base_url: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    #[serde(default = "default_messaging_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub use_queue: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_graph_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_messaging_timeout() -> u64 {
    10
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    256
}

impl MessagingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrderConfig {
    /// Recipient that gets a copy of every placed order.
    pub delivery_operator: Option<String>,
    /// Sent to the customer after the confirmation. Empty or unset sends nothing.
    pub eta_message: Option<String>,
    pub currency_symbol: String,
    /// Shorthand -> catalog product name, e.g. `burger = "Cheeseburger"`.
    pub synonyms: HashMap<String, String>,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            delivery_operator: None,
            eta_message: Some("Your order is on its way!".to_string()),
            currency_symbol: "₦".to_string(),
            synonyms: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NutritionConfig {
    pub system_prompt: String,
    pub max_history: usize,
}

impl Default for NutritionConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a certified, friendly nutritionist. Give concise advice."
                .to_string(),
            max_history: 40,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ChowbotConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CHOWBOT").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
