//! Storage seams for sessions, the product catalog, and placed orders.
//!
//! Two backends implement all three traits: `PgStore` (PostgreSQL) and
//! `MemoryStore` (process-local, used for development and tests).

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ChowbotError, Result};
use crate::models::{NewProduct, Order, Product, ServiceKind, Session, SessionPatch, Step};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable per-user conversation state with TTL expiry on `updated_at`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `None` for missing sessions and for sessions older than the TTL.
    async fn get(&self, user_id: &str) -> Result<Option<Session>>;

    /// Replace any existing session for `user_id` with a fresh one.
    async fn create(&self, user_id: &str, step: Step, service: Option<ServiceKind>)
        -> Result<Session>;

    /// Merge `patch` into the stored session and refresh `updated_at`.
    /// A missing session is not an error.
    async fn update(&self, user_id: &str, patch: SessionPatch) -> Result<()>;

    /// Move a live session from step `from` to step `to` in one conditional
    /// write. Returns `false`, writing nothing, when the session is missing,
    /// expired, or no longer at `from`. Of several concurrent claims on the
    /// same session, at most one returns `true`.
    async fn claim_step(&self, user_id: &str, from: Step, to: Step) -> Result<bool>;

    async fn delete(&self, user_id: &str) -> Result<()>;

    /// Delete every expired session, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    /// Backend description for health checks.
    async fn ping(&self) -> Result<String>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// All products in menu order.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Case-insensitive exact name lookup.
    async fn find_by_name(&self, name: &str) -> Result<Option<Product>>;

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

    /// Atomically decrement stock by `quantity` if at least that much is left.
    /// Returns `false` without writing anything otherwise, including when
    /// `quantity` exceeds the stock column's range.
    async fn try_reserve(&self, id: Uuid, quantity: u32) -> Result<bool>;

    /// Give back stock taken by `try_reserve`. A quantity outside the stock
    /// column's range is rejected with `InvalidOrder`.
    async fn release(&self, id: Uuid, quantity: u32) -> Result<()>;

    async fn count_products(&self) -> Result<u64>;

    async fn insert_product(&self, product: NewProduct) -> Result<Product>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>>;
}

/// Stock columns are `INTEGER`; quantities past `i32::MAX` cannot be applied.
fn stock_delta(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| ChowbotError::InvalidOrder(format!("quantity {} is out of range", quantity)))
}
