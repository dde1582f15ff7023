use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;
use super::order::OrderItem;

/// Which flow owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    None,
    Order,
    Nutrition,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::None => "none",
            ServiceKind::Order => "order",
            ServiceKind::Nutrition => "nutrition",
        }
    }

    /// Unknown labels map to `None`, which the router treats as an ownerless session.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "order" => ServiceKind::Order,
            "nutrition" => ServiceKind::Nutrition,
            _ => ServiceKind::None,
        }
    }
}

/// Known step labels. Sessions store the raw label so that a label this
/// build does not know about survives a round trip and can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitChoice,
    AwaitItems,
    AwaitConfirm,
    AwaitAddress,
    ConfirmAddress,
    /// Held by the one request that is placing the order.
    Committing,
    Nutrition,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::AwaitChoice => "await_choice",
            Step::AwaitItems => "await_items",
            Step::AwaitConfirm => "await_confirm",
            Step::AwaitAddress => "await_address",
            Step::ConfirmAddress => "confirm_address",
            Step::Committing => "committing",
            Step::Nutrition => "nutrition",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "await_choice" => Some(Step::AwaitChoice),
            "await_items" => Some(Step::AwaitItems),
            "await_confirm" => Some(Step::AwaitConfirm),
            "await_address" => Some(Step::AwaitAddress),
            "confirm_address" => Some(Step::ConfirmAddress),
            "committing" => Some(Step::Committing),
            "nutrition" => Some(Step::Nutrition),
            _ => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-flow working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OrderDraft {
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub address: Option<String>,
}

/// Nutrition-flow working memory: the full prompt context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NutritionChat {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Flow-local session data, stored as a single JSON document tagged by `flow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowData {
    #[default]
    Idle,
    Order(OrderDraft),
    Nutrition(NutritionChat),
}

impl FlowData {
    pub fn order_draft(&self) -> Option<&OrderDraft> {
        match self {
            FlowData::Order(draft) => Some(draft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub service: ServiceKind,
    pub step: String,
    pub data: FlowData,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session state: empty data, no history.
    pub fn new(user_id: impl Into<String>, step: Step, service: Option<ServiceKind>) -> Self {
        Self {
            user_id: user_id.into(),
            service: service.unwrap_or_default(),
            step: step.as_str().to_string(),
            data: FlowData::Idle,
            updated_at: Utc::now(),
        }
    }

    pub fn step(&self) -> Option<Step> {
        Step::parse(&self.step)
    }

    pub fn history(&self) -> &[ChatMessage] {
        match &self.data {
            FlowData::Nutrition(chat) => &chat.history,
            _ => &[],
        }
    }

    /// Merge a patch into this session and refresh `updated_at`.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(service) = patch.service {
            self.service = service;
        }
        if let Some(step) = patch.step {
            self.step = step.as_str().to_string();
        }
        if let Some(data) = patch.data {
            self.data = data;
        }
        self.updated_at = Utc::now();
    }
}

/// Named fields to merge into a stored session. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub service: Option<ServiceKind>,
    pub step: Option<Step>,
    pub data: Option<FlowData>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: ServiceKind) -> Self {
        self.service = Some(service);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    pub fn data(mut self, data: FlowData) -> Self {
        self.data = Some(data);
        self
    }
}
