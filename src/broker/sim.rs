//! In-process paper broker. Orders rest until a test (or paper session
//! script) fills, cancels, or drops them, which makes fill detection,
//! reconciliation and orphan handling exercisable without a live gateway.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BrokerGateway, Instrument, OrderRequest, RawBrokerOrder};
use crate::models::{OrderAction, OrderStatus, OrderStatusReport, PriceQuote, PriceSource};
use crate::{GridError, Result};

#[derive(Debug, Clone)]
struct SimOrder {
    request: OrderRequest,
    status: OrderStatus,
    filled_quantity: i64,
    avg_fill_price: f64,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    next_order_id: i64,
    orders: HashMap<i64, SimOrder>,
    raw_injections: Vec<RawBrokerOrder>,
    quote: Option<PriceQuote>,
    positions: HashMap<String, i64>,
    cash: f64,
    fail_place_after: Option<u32>,
    failing_connects: u32,
}

pub struct SimBroker {
    state: Mutex<SimState>,
}

impl SimBroker {
    pub fn new(cash: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                next_order_id: 1,
                cash,
                ..SimState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A poisoned lock means a test already panicked; propagate.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the quote returned by `fetch_price`.
    pub fn set_quote(&self, price: f64, source: PriceSource) {
        self.lock().quote = Some(PriceQuote { price, source });
    }

    /// Make `fetch_price` report no usable price.
    pub fn clear_quote(&self) {
        self.lock().quote = None;
    }

    /// Fill a resting order at the given price, adjusting position and cash.
    pub fn fill_order(&self, order_id: i64, price: f64) {
        let mut state = self.lock();
        let Some(order) = state.orders.get_mut(&order_id) else {
            return;
        };
        if order.status != OrderStatus::Open {
            return;
        }
        order.status = OrderStatus::Filled;
        order.filled_quantity = order.request.quantity;
        order.avg_fill_price = price;

        let (symbol, action, quantity) = (
            order.request.symbol.clone(),
            order.request.action,
            order.request.quantity,
        );
        let signed = match action {
            OrderAction::Buy => quantity,
            OrderAction::Sell => -quantity,
        };
        *state.positions.entry(symbol).or_insert(0) += signed;
        state.cash -= signed as f64 * price;
    }

    /// Forget an order entirely, as a broker does the instant an order
    /// terminates: it vanishes from the snapshot and from status queries.
    pub fn drop_order(&self, order_id: i64) {
        self.lock().orders.remove(&order_id);
    }

    pub fn mark_inactive(&self, order_id: i64) {
        if let Some(order) = self.lock().orders.get_mut(&order_id) {
            if order.status == OrderStatus::Open {
                order.status = OrderStatus::Inactive;
            }
        }
    }

    /// Add a raw record to the next snapshot, valid or not.
    pub fn inject_raw(&self, raw: RawBrokerOrder) {
        self.lock().raw_injections.push(raw);
    }

    /// Reject the next `place_order` call.
    pub fn fail_next_place(&self) {
        self.fail_place_after(0);
    }

    /// Accept `successes` more placements, then reject one.
    pub fn fail_place_after(&self, successes: u32) {
        self.lock().fail_place_after = Some(successes);
    }

    /// Refuse the next `attempts` connection attempts.
    pub fn fail_connects(&self, attempts: u32) {
        self.lock().failing_connects = attempts;
    }

    pub fn set_position(&self, symbol: &str, quantity: i64) {
        self.lock().positions.insert(symbol.to_string(), quantity);
    }

    /// The request an order was submitted with, if the broker still knows it.
    pub fn submitted(&self, order_id: i64) -> Option<OrderRequest> {
        self.lock().orders.get(&order_id).map(|o| o.request.clone())
    }

    pub fn open_count(&self) -> usize {
        self.lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }
}

#[async_trait]
impl BrokerGateway for SimBroker {
    async fn connect(&self) -> Result<()> {
        let mut state = self.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(GridError::Connection("simulated connect failure".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    async fn qualify(&self, symbol: &str) -> Result<Instrument> {
        if symbol.is_empty() {
            return Err(GridError::Broker("empty symbol".to_string()));
        }
        Ok(Instrument {
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        })
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote> {
        self.lock().quote.ok_or(GridError::PriceUnavailable {
            symbol: symbol.to_string(),
        })
    }

    async fn available_funds(&self) -> Result<f64> {
        Ok(self.lock().cash)
    }

    async fn net_position(&self, symbol: &str) -> Result<i64> {
        Ok(self.lock().positions.get(symbol).copied().unwrap_or(0))
    }

    async fn open_order_snapshot(&self) -> Result<Vec<RawBrokerOrder>> {
        let state = self.lock();
        let mut snapshot: Vec<RawBrokerOrder> = state
            .orders
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Open)
            .map(|(id, o)| RawBrokerOrder {
                order_id: Some(*id),
                symbol: Some(o.request.symbol.clone()),
                action: Some(o.request.action.as_str().to_string()),
                quantity: Some(o.request.quantity as f64),
                price: o.request.limit_price,
                parent_id: o.request.parent_id,
            })
            .collect();
        snapshot.extend(state.raw_injections.iter().cloned());
        Ok(snapshot)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<i64> {
        let mut state = self.lock();
        if !state.connected {
            return Err(GridError::Connection("not connected".to_string()));
        }
        match state.fail_place_after {
            Some(0) => {
                state.fail_place_after = None;
                return Err(GridError::Broker("simulated rejection".to_string()));
            }
            Some(n) => state.fail_place_after = Some(n - 1),
            None => {}
        }
        let order_id = state.next_order_id;
        state.next_order_id += 1;
        state.orders.insert(
            order_id,
            SimOrder {
                request: request.clone(),
                status: OrderStatus::Open,
                filled_quantity: 0,
                avg_fill_price: 0.0,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let mut state = self.lock();
        match state.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Open => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(GridError::Broker(format!("unknown order {order_id}"))),
        }
    }

    async fn cancel_all(&self, symbol: &str) -> Result<()> {
        let mut state = self.lock();
        for order in state.orders.values_mut() {
            if order.request.symbol == symbol && order.status == OrderStatus::Open {
                order.status = OrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn order_status(&self, order_id: i64) -> Result<Option<OrderStatusReport>> {
        Ok(self.lock().orders.get(&order_id).map(|o| OrderStatusReport {
            status: o.status,
            filled_quantity: o.filled_quantity,
            avg_fill_price: o.avg_fill_price,
        }))
    }
}
