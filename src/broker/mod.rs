//! The broker gateway boundary. The wire/session protocol lives behind
//! [`BrokerGateway`]; the engine only sees typed requests and validated
//! records. Raw snapshot entries cross the boundary as [`RawBrokerOrder`]
//! and are promoted to [`BrokerOrder`] by a strict parse-and-validate step
//! rather than best-effort attribute guessing.

pub mod sim;

use async_trait::async_trait;

use crate::models::{OrderAction, OrderStatusReport, PriceQuote};
use crate::Result;

pub use sim::SimBroker;

/// A tradable instrument resolved for a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

/// An order as submitted to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: i64,
    /// `None` submits a market order.
    pub limit_price: Option<f64>,
    /// Broker id of the bracket parent this order attaches to.
    pub parent_id: Option<i64>,
    /// When false the broker holds the order untransmitted, so a bracket
    /// parent cannot execute before its child is linked.
    pub transmit: bool,
    /// Eligible for execution outside regular trading hours.
    pub outside_rth: bool,
    /// Route to the overnight venue.
    pub overnight: bool,
}

impl OrderRequest {
    pub fn limit(symbol: &str, action: OrderAction, quantity: i64, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            quantity,
            limit_price: Some(price),
            parent_id: None,
            transmit: true,
            outside_rth: false,
            overnight: false,
        }
    }

    pub fn market(symbol: &str, action: OrderAction, quantity: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            quantity,
            limit_price: None,
            parent_id: None,
            transmit: true,
            outside_rth: false,
            overnight: false,
        }
    }
}

/// An open-order snapshot entry exactly as the broker reported it, before
/// validation. Any field may be missing or garbage.
#[derive(Debug, Clone, Default)]
pub struct RawBrokerOrder {
    pub order_id: Option<i64>,
    pub symbol: Option<String>,
    pub action: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub parent_id: Option<i64>,
}

/// A validated open-order snapshot entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub order_id: i64,
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: i64,
    pub price: Option<f64>,
    pub parent_id: Option<i64>,
}

impl BrokerOrder {
    /// Promote a raw record, or say exactly what is wrong with it. A
    /// malformed record is an explicit outcome for the caller to skip and
    /// log, never a crash and never a guess.
    pub fn from_raw(raw: &RawBrokerOrder) -> std::result::Result<Self, String> {
        let order_id = match raw.order_id {
            Some(id) if id > 0 => id,
            Some(id) => return Err(format!("non-positive order id {id}")),
            None => return Err("missing order id".to_string()),
        };

        let symbol = match raw.symbol.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(format!("order {order_id}: missing symbol")),
        };

        let action = raw
            .action
            .as_deref()
            .and_then(OrderAction::parse)
            .ok_or_else(|| format!("order {order_id}: side is not BUY/SELL"))?;

        let quantity = match raw.quantity {
            Some(q) if q > 0.0 && q.fract() == 0.0 => q as i64,
            Some(q) => return Err(format!("order {order_id}: bad quantity {q}")),
            None => return Err(format!("order {order_id}: missing quantity")),
        };

        // A negative limit price is garbage; treat the order as market.
        let price = raw.price.filter(|p| *p >= 0.0 && p.is_finite());

        Ok(Self {
            order_id,
            symbol,
            action,
            quantity,
            price,
            parent_id: raw.parent_id,
        })
    }
}

/// Everything the engine needs from a broker. All calls are blocking with
/// bounded waits; the loop tolerates multi-second latencies by design.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);

    /// Resolve a tradable instrument for a symbol.
    async fn qualify(&self, symbol: &str) -> Result<Instrument>;

    /// Fetch a live price. Implementations walk their own fallback chain
    /// (trade price, last, close, bid/ask midpoint, either side alone,
    /// historical bar) and report the source used in the quote.
    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote>;

    /// Available funds from the account summary.
    async fn available_funds(&self) -> Result<f64>;

    /// Authoritative signed net position for a symbol.
    async fn net_position(&self, symbol: &str) -> Result<i64>;

    /// Full open-order snapshot, unvalidated.
    async fn open_order_snapshot(&self) -> Result<Vec<RawBrokerOrder>>;

    /// Submit an order; returns the broker-assigned order id on ack.
    async fn place_order(&self, request: &OrderRequest) -> Result<i64>;

    async fn cancel_order(&self, order_id: i64) -> Result<()>;
    async fn cancel_all(&self, symbol: &str) -> Result<()>;

    /// Per-order status, `None` once the broker has forgotten the order.
    async fn order_status(&self, order_id: i64) -> Result<Option<OrderStatusReport>>;
}
