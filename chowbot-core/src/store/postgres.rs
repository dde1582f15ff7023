use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{stock_delta, Catalog, OrderStore, SessionStore};
use crate::error::{ChowbotError, Result};
use crate::models::{
    FlowData, NewProduct, Order, OrderItem, OrderStatus, Product, ServiceKind, Session,
    SessionPatch, Step,
};

const PRODUCT_COLUMNS: &str = "id, name, description, price, stock, is_available, position";

/// PostgreSQL-backed store. PostgreSQL has no native document TTL, so `get`
/// filters on `updated_at` and `purge_expired` is driven by a background sweeper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    session_ttl: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, session_ttl: Duration) -> Self {
        Self { pool, session_ttl }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn ttl_seconds(&self) -> f64 {
        self.session_ttl.as_secs_f64()
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    user_id: String,
    service: String,
    step: String,
    data: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let data = serde_json::from_value::<FlowData>(row.data).unwrap_or_else(|e| {
            tracing::warn!(user_id = %row.user_id, error = %e, "Undecodable session data, treating as idle");
            FlowData::Idle
        });
        Session {
            user_id: row.user_id,
            service: ServiceKind::parse(&row.service),
            step: row.step,
            data,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    items: Json<Vec<OrderItem>>,
    total_price: f64,
    delivery_address: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = ChowbotError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            ChowbotError::Other(format!("order {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            total_price: row.total_price,
            delivery_address: row.delivery_address,
            status,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn get(&self, user_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT user_id, service, step, data, updated_at FROM sessions
             WHERE user_id = $1 AND updated_at > now() - make_interval(secs => $2)",
        )
        .bind(user_id)
        .bind(self.ttl_seconds())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn create(
        &self,
        user_id: &str,
        step: Step,
        service: Option<ServiceKind>,
    ) -> Result<Session> {
        let session = Session::new(user_id, step, service);

        sqlx::query(
            "INSERT INTO sessions (user_id, service, step, data, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id) DO UPDATE SET
                service = EXCLUDED.service,
                step = EXCLUDED.step,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&session.user_id)
        .bind(session.service.as_str())
        .bind(&session.step)
        .bind(serde_json::to_value(&session.data)?)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn update(&self, user_id: &str, patch: SessionPatch) -> Result<()> {
        let data = patch.data.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            "UPDATE sessions SET
                service = COALESCE($2, service),
                step = COALESCE($3, step),
                data = COALESCE($4, data),
                updated_at = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(patch.service.map(|s| s.as_str()))
        .bind(patch.step.map(|s| s.as_str()))
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_step(&self, user_id: &str, from: Step, to: Step) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET step = $3, updated_at = now()
             WHERE user_id = $1 AND step = $2
               AND updated_at > now() - make_interval(secs => $4)",
        )
        .bind(user_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(self.ttl_seconds())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE updated_at <= now() - make_interval(secs => $1)",
        )
        .bind(self.ttl_seconds())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn list_products(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY position, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE lower(name) = lower($1)"
        ))
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn try_reserve(&self, id: Uuid, quantity: u32) -> Result<bool> {
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2",
        )
        .bind(id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: Uuid, quantity: u32) -> Result<()> {
        let quantity = stock_delta(quantity)?;
        sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(id)
            .bind(quantity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_products(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::bigint FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let product = product.into_product();
        sqlx::query(
            "INSERT INTO products (id, name, description, price, stock, is_available, position)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.is_available)
        .bind(product.position)
        .execute(&self.pool)
        .await?;
        Ok(product)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, items, total_price, delivery_address, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id)
        .bind(&order.user_id)
        .bind(Json(&order.items))
        .bind(order.total_price)
        .bind(&order.delivery_address)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, user_id, items, total_price, delivery_address, status, created_at
             FROM orders WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }
}
