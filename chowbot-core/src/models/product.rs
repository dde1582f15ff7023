use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i32,
    pub is_available: bool,
    /// Menu position; numeric order codes follow this ordering.
    pub position: i32,
}

/// Catalog entry before it has been assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i32,
    pub is_available: bool,
    pub position: i32,
}

impl NewProduct {
    pub fn into_product(self) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            is_available: self.is_available,
            position: self.position,
        }
    }
}
