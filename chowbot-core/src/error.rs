use thiserror::Error;

use crate::generation::GenerationError;
use crate::messaging::DeliveryError;

#[derive(Error, Debug)]
pub enum ChowbotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ChowbotError>;
