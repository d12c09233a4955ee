use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::channel::{FunctionCall, FunctionDeclaration};

/// Tool the engine calls once a sale is closed
pub const REGISTER_SALE: &str = "register_sale";

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("unexpected tool call: {0}")]
    UnknownTool(String),

    #[error("invalid sale arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    #[error("sale has no items")]
    NoItems,

    #[error("sale total must be positive (got {0})")]
    NonPositiveTotal(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl OrderItem {
    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    InProgress,
    Ready,
    Delivered,
}

/// Sale closed by the assistant, as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleSignal {
    /// Engine call id, echoed in the tool response
    pub call_id: Option<String>,
    pub client_name: String,
    pub items: Vec<OrderItem>,
    pub payment_method: String,
    pub paid_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SaleArgs {
    #[serde(default)]
    client_name: String,
    #[serde(default)]
    items: Vec<OrderItem>,
    #[serde(default)]
    payment_method: String,
    #[serde(default)]
    paid_amount: Option<f64>,
}

impl SaleSignal {
    /// Read a `register_sale` tool call
    pub fn from_call(call: &FunctionCall) -> Result<Self, OrderError> {
        if call.name != REGISTER_SALE {
            return Err(OrderError::UnknownTool(call.name.clone()));
        }

        let args: SaleArgs = serde_json::from_value(call.args.clone())?;
        Ok(Self {
            call_id: call.id.clone(),
            client_name: args.client_name,
            items: args.items,
            payment_method: args.payment_method,
            paid_amount: args.paid_amount,
        })
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    /// Structural completeness only: items present and a positive total
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let total = self.total();
        if !(total > 0.0) {
            return Err(OrderError::NonPositiveTotal(total));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: uuid::Uuid,
    pub order_number: String,
    pub client_name: String,
    pub items: Vec<OrderItem>,
    pub total: f64,
    pub paid_amount: f64,
    pub payment_method: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
}

impl Order {
    /// Build a pending order from a validated sale
    pub fn from_sale(
        sale: &SaleSignal,
        order_number: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        sale.validate()?;

        let total = sale.total();
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            order_number: order_number.to_string(),
            client_name: sale.client_name.clone(),
            items: sale.items.clone(),
            total,
            paid_amount: sale.paid_amount.unwrap_or(total),
            payment_method: sale.payment_method.clone(),
            status: OrderStatus::Pending,
            created_at: now,
            delivery_date: now,
        })
    }
}

/// Receives orders created from closed sales
///
/// Failures are logged by the caller and never retried.
#[async_trait::async_trait]
pub trait OrderSink: Send + Sync {
    async fn on_order_created(&self, order: Order) -> Result<()>;
}

/// Order sink that only records orders in the log
#[derive(Debug, Default)]
pub struct LoggingOrderSink;

#[async_trait::async_trait]
impl OrderSink for LoggingOrderSink {
    async fn on_order_created(&self, order: Order) -> Result<()> {
        info!(
            "Order #{} for {}: {} items, total ${:.2} via {}",
            order.order_number,
            order.client_name,
            order.items.len(),
            order.total,
            order.payment_method
        );
        Ok(())
    }
}

/// Declaration of the `register_sale` tool sent during setup
pub fn register_sale_declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: REGISTER_SALE.to_string(),
        description: "Register a closed sale so the order and receipt can be created".to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "client_name": { "type": "STRING" },
                "items": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "name": { "type": "STRING" },
                            "quantity": { "type": "INTEGER" },
                            "price": { "type": "NUMBER" }
                        },
                        "required": ["name", "quantity", "price"]
                    }
                },
                "payment_method": { "type": "STRING" },
                "paid_amount": { "type": "NUMBER" }
            },
            "required": ["client_name", "items", "payment_method"]
        }),
    }
}
