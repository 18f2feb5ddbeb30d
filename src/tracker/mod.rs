//! In-memory cache of orders we believe are outstanding right now, keyed
//! by broker order id. Owned by the trading loop and passed by reference
//! into the bracket coordinator and the reconciler; never the durable
//! source of truth. Safe to discard and rebuild from a broker snapshot.

use std::collections::HashMap;

use crate::models::OrderAction;

/// One outstanding order as we last saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: i64,
    /// `None` for market orders.
    pub price: Option<f64>,
    /// Broker id of the bracket parent, set on take-profit children.
    pub parent_id: Option<i64>,
}

#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<i64, TrackedOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, broker_order_id: i64, order: TrackedOrder) {
        self.orders.insert(broker_order_id, order);
    }

    pub fn remove(&mut self, broker_order_id: i64) -> Option<TrackedOrder> {
        self.orders.remove(&broker_order_id)
    }

    pub fn get(&self, broker_order_id: i64) -> Option<&TrackedOrder> {
        self.orders.get(&broker_order_id)
    }

    pub fn contains(&self, broker_order_id: i64) -> bool {
        self.orders.contains_key(&broker_order_id)
    }

    /// Discard everything and adopt the given set wholesale. Used by
    /// reconciliation, for which the broker snapshot is authoritative.
    pub fn replace_all(&mut self, orders: HashMap<i64, TrackedOrder>) {
        self.orders = orders;
    }

    /// Broker ids currently tracked, in no particular order.
    pub fn order_ids(&self) -> Vec<i64> {
        self.orders.keys().copied().collect()
    }

    pub fn count(&self, symbol: &str, action: OrderAction) -> usize {
        self.orders
            .values()
            .filter(|o| o.symbol == symbol && o.action == action)
            .count()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &TrackedOrder)> {
        self.orders.iter().map(|(id, o)| (*id, o))
    }
}
