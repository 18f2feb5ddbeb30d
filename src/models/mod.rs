use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Buy => "BUY",
            OrderAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(OrderAction::Buy),
            "SELL" => Some(OrderAction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status.
///
/// Transitions are monotone: `Open` may move to any terminal state, and no
/// transition leaves a terminal state. The ledger enforces this on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Inactive,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "Open",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Inactive => "Inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(OrderStatus::Open),
            "Filled" => Some(OrderStatus::Filled),
            "Cancelled" => Some(OrderStatus::Cancelled),
            "Inactive" => Some(OrderStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable order row. `price` is `None` for market orders and
/// `broker_order_id` is `None` until the broker acknowledges the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub local_id: i64,
    pub symbol: String,
    pub action: OrderAction,
    pub price: Option<f64>,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub broker_order_id: Option<i64>,
    pub status: OrderStatus,
}

/// A durable fill row. `trade_id` is the broker-assigned id, `None` for
/// synthetic fills recorded without a known originating order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub local_id: i64,
    pub symbol: String,
    pub action: OrderAction,
    pub price: f64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub trade_id: Option<i64>,
}

/// Where a quote came from, in falling order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Trade,
    Last,
    Close,
    Midpoint,
    Bid,
    Ask,
    HistoricalBar,
}

/// A price with its provenance. Fallback between sources is a designed
/// branch carried in the value, not error-driven control flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub source: PriceSource,
}

/// Per-order status as reported by the broker.
#[derive(Debug, Clone, Copy)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub avg_fill_price: f64,
}
