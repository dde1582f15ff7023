use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChowbotError, Result};

/// Round a currency amount to cents.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// A line of an order. `name` and `unit_price` are snapshots taken when the
/// items were confirmed; later catalog changes never reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl OrderItem {
    pub fn new(product_id: Uuid, name: impl Into<String>, quantity: u32, unit_price: f64) -> Result<Self> {
        if quantity == 0 {
            return Err(ChowbotError::InvalidOrder(
                "quantity must be greater than 0".to_string(),
            ));
        }
        if !unit_price.is_finite() || unit_price < 0.0 {
            return Err(ChowbotError::InvalidOrder(
                "unit_price must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            product_id,
            name: name.into(),
            quantity,
            unit_price,
        })
    }

    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

/// Sum of `quantity × unit_price`, rounded to cents.
pub fn items_total(items: &[OrderItem]) -> f64 {
    round_money(items.iter().map(OrderItem::line_total).sum())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Delivered => "delivered",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "delivered" => Some(OrderStatus::Delivered),
            _ => None,
        }
    }
}

/// A placed order. Written once by the commit step and never modified here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: f64,
    pub delivery_address: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order. The total is always recomputed from the items.
    pub fn place(
        user_id: impl Into<String>,
        items: Vec<OrderItem>,
        delivery_address: impl Into<String>,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(ChowbotError::InvalidOrder("order has no items".to_string()));
        }
        let total_price = items_total(&items);
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            items,
            total_price,
            delivery_address: delivery_address.into(),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_item_rejects_zero_quantity() {
        let result = OrderItem::new(Uuid::new_v4(), "Burger", 0, 5.0);
        assert!(matches!(result, Err(ChowbotError::InvalidOrder(_))));
    }

    #[test]
    fn test_order_item_rejects_negative_price() {
        let result = OrderItem::new(Uuid::new_v4(), "Burger", 1, -2.0);
        assert!(matches!(result, Err(ChowbotError::InvalidOrder(_))));
    }

    #[test]
    fn test_order_item_accepts_free_items() {
        let item = OrderItem::new(Uuid::new_v4(), "Water", 2, 0.0).unwrap();
        assert_eq!(item.line_total(), 0.0);
    }

    #[test]
    fn test_place_computes_total_from_items() {
        let items = vec![
            OrderItem::new(Uuid::new_v4(), "Margherita Pizza", 2, 12.99).unwrap(),
            OrderItem::new(Uuid::new_v4(), "Fruit Smoothie", 1, 6.50).unwrap(),
        ];
        let order = Order::place("user-1", items, "12 Marina Road").unwrap();
        assert_eq!(order.total_price, 32.48);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.delivery_address, "12 Marina Road");
    }

    #[test]
    fn test_place_rejects_empty_orders() {
        assert!(Order::place("user-1", Vec::new(), "somewhere").is_err());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Delivered] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }
}
