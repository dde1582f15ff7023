use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{stock_delta, Catalog, OrderStore, SessionStore};
use crate::error::{ChowbotError, Result};
use crate::models::{NewProduct, Order, Product, ServiceKind, Session, SessionPatch, Step};

/// Process-local store. Every write is a single lock acquisition, so the
/// stock reservation is a true test-and-decrement.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    products: Mutex<Vec<Product>>,
    orders: Mutex<Vec<Order>>,
    session_ttl: chrono::Duration,
}

impl MemoryStore {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            products: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            session_ttl: chrono::Duration::from_std(session_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    fn is_expired(&self, session: &Session) -> bool {
        session.updated_at + self.session_ttl <= Utc::now()
    }

    /// Overwrite a stored session as-is, including `updated_at`.
    pub async fn put_session(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.user_id.clone(), session);
    }

    /// Reprice a product in place. Returns false when the id is unknown.
    pub async fn set_price(&self, id: Uuid, price: f64) -> bool {
        let mut products = self.products.lock().await;
        match products.iter_mut().find(|p| p.id == id) {
            Some(product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(user_id)
            .filter(|s| !self.is_expired(s))
            .cloned())
    }

    async fn create(
        &self,
        user_id: &str,
        step: Step,
        service: Option<ServiceKind>,
    ) -> Result<Session> {
        let session = Session::new(user_id, step, service);
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session.clone());
        Ok(session)
    }

    async fn update(&self, user_id: &str, patch: SessionPatch) -> Result<()> {
        if let Some(session) = self.sessions.write().await.get_mut(user_id) {
            session.apply(patch);
        }
        Ok(())
    }

    async fn claim_step(&self, user_id: &str, from: Step, to: Step) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(user_id) {
            Some(session) if session.step == from.as_str() && !self.is_expired(session) => {
                session.apply(SessionPatch::new().step(to));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.sessions.write().await.remove(user_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s));
        Ok((before - sessions.len()) as u64)
    }

    async fn ping(&self) -> Result<String> {
        Ok("memory".to_string())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn list_products(&self) -> Result<Vec<Product>> {
        let mut products = self.products.lock().await.clone();
        products.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        Ok(products)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Product>> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .products
            .lock()
            .await
            .iter()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned())
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self
            .products
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn try_reserve(&self, id: Uuid, quantity: u32) -> Result<bool> {
        let Ok(quantity) = i32::try_from(quantity) else {
            return Ok(false);
        };
        let mut products = self.products.lock().await;
        match products.iter_mut().find(|p| p.id == id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: Uuid, quantity: u32) -> Result<()> {
        let quantity = stock_delta(quantity)?;
        let mut products = self.products.lock().await;
        if let Some(product) = products.iter_mut().find(|p| p.id == id) {
            product.stock = product.stock.saturating_add(quantity);
        }
        Ok(())
    }

    async fn count_products(&self) -> Result<u64> {
        Ok(self.products.lock().await.len() as u64)
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let mut products = self.products.lock().await;
        let lowered = product.name.to_lowercase();
        if products.iter().any(|p| p.name.to_lowercase() == lowered) {
            return Err(ChowbotError::Other(format!(
                "product '{}' already exists",
                product.name
            )));
        }
        let product = product.into_product();
        products.push(product.clone());
        Ok(product)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.orders.lock().await.push(order.clone());
        Ok(())
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }
}
