pub mod chat;
pub mod order;
pub mod product;
pub mod session;

pub use chat::{ChatMessage, Role};
pub use order::{items_total, round_money, Order, OrderItem, OrderStatus};
pub use product::{NewProduct, Product};
pub use session::{FlowData, NutritionChat, OrderDraft, ServiceKind, Session, SessionPatch, Step};
