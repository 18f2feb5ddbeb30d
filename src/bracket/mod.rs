//! Bracket placement: a buy order paired with its take-profit sell,
//! submitted as a unit. The parent goes to the broker with transmission
//! suppressed, the child is linked to the acknowledged parent id and
//! transmitted, and both legs are registered in the tracker and persisted
//! in the ledger before the call returns.

use crate::broker::{BrokerGateway, OrderRequest};
use crate::ledger::Ledger;
use crate::models::OrderAction;
use crate::session::TradingPeriod;
use crate::sizing::round_price;
use crate::tracker::{OrderTracker, TrackedOrder};
use crate::{GridError, Result};

/// Outcome of a placement attempt. A closed market is a no-op, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Placed { parent_id: i64, child_id: i64 },
    MarketClosed,
}

pub struct BracketCoordinator<'a, B: BrokerGateway> {
    broker: &'a B,
    ledger: &'a Ledger,
    profit_pct: f64,
}

impl<'a, B: BrokerGateway> BracketCoordinator<'a, B> {
    pub fn new(broker: &'a B, ledger: &'a Ledger, profit_pct: f64) -> Self {
        Self {
            broker,
            ledger,
            profit_pct,
        }
    }

    /// Place a limit buy at `buy_price` with its take-profit sell at
    /// `buy_price * (1 + profit_pct)`.
    ///
    /// If the parent submission fails nothing else is attempted. If the
    /// child submission fails after the parent was acknowledged, the parent
    /// stays live and the error surfaces it as an orphan for the next
    /// reconciliation pass.
    pub async fn place_bracket(
        &self,
        tracker: &mut OrderTracker,
        symbol: &str,
        quantity: i64,
        buy_price: f64,
        period: TradingPeriod,
    ) -> Result<Placement> {
        if !period.may_place_orders() {
            tracing::warn!(symbol, "market is closed, bracket not placed");
            return Ok(Placement::MarketClosed);
        }

        let sell_price = round_price(buy_price * (1.0 + self.profit_pct));

        let mut parent = OrderRequest::limit(symbol, OrderAction::Buy, quantity, buy_price);
        parent.transmit = false;
        apply_session(&mut parent, period);

        let parent_id = self.broker.place_order(&parent).await?;
        self.register(tracker, parent_id, &parent, None).await;

        let mut child = OrderRequest::limit(symbol, OrderAction::Sell, quantity, sell_price);
        child.parent_id = Some(parent_id);
        apply_session(&mut child, period);

        let child_id = match self.broker.place_order(&child).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    symbol,
                    parent_id,
                    error = %e,
                    "take-profit submission failed, parent is live and unmatched"
                );
                return Err(GridError::OrphanedParent {
                    parent_id,
                    reason: e.to_string(),
                });
            }
        };
        self.register(tracker, child_id, &child, Some(parent_id)).await;

        tracing::info!(
            symbol,
            quantity,
            buy_price,
            sell_price,
            parent_id,
            child_id,
            "bracket placed"
        );

        Ok(Placement::Placed { parent_id, child_id })
    }

    /// Place a market buy bracket. Market parents are only permitted in the
    /// regular session; in any other open window this degrades to an
    /// aggressive limit 0.5% above the current quote.
    pub async fn place_market_bracket(
        &self,
        tracker: &mut OrderTracker,
        symbol: &str,
        quantity: i64,
        period: TradingPeriod,
    ) -> Result<Placement> {
        if !period.may_place_orders() {
            tracing::warn!(symbol, "market is closed, bracket not placed");
            return Ok(Placement::MarketClosed);
        }

        let quote = self.broker.fetch_price(symbol).await?;

        if !period.market_orders_allowed() {
            let aggressive = round_price(quote.price * 1.005);
            tracing::debug!(
                symbol,
                aggressive,
                %period,
                "outside regular hours, using aggressive limit parent"
            );
            return self
                .place_bracket(tracker, symbol, quantity, aggressive, period)
                .await;
        }

        // The child limit is priced from the quote at submission time, not
        // from the eventual parent fill.
        let sell_price = round_price(quote.price * (1.0 + self.profit_pct));

        let mut parent = OrderRequest::market(symbol, OrderAction::Buy, quantity);
        parent.transmit = false;

        let parent_id = self.broker.place_order(&parent).await?;
        self.register(tracker, parent_id, &parent, None).await;

        let mut child = OrderRequest::limit(symbol, OrderAction::Sell, quantity, sell_price);
        child.parent_id = Some(parent_id);

        let child_id = match self.broker.place_order(&child).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    symbol,
                    parent_id,
                    error = %e,
                    "take-profit submission failed, parent is live and unmatched"
                );
                return Err(GridError::OrphanedParent {
                    parent_id,
                    reason: e.to_string(),
                });
            }
        };
        self.register(tracker, child_id, &child, Some(parent_id)).await;

        tracing::info!(
            symbol,
            quantity,
            sell_price,
            parent_id,
            child_id,
            "market bracket placed"
        );

        Ok(Placement::Placed { parent_id, child_id })
    }

    /// Cancel one tracked order, propagating the terminal status to the
    /// ledger.
    pub async fn cancel_order(&self, tracker: &mut OrderTracker, order_id: i64) -> Result<()> {
        self.broker.cancel_order(order_id).await?;
        if let Err(e) = self
            .ledger
            .update_status(order_id, crate::models::OrderStatus::Cancelled)
            .await
        {
            tracing::error!(order_id, error = %e, "failed to persist cancellation");
        }
        tracker.remove(order_id);
        tracing::info!(order_id, "order cancelled");
        Ok(())
    }

    /// Cancel every open order for a symbol.
    pub async fn cancel_all(&self, tracker: &mut OrderTracker, symbol: &str) -> Result<usize> {
        self.broker.cancel_all(symbol).await?;

        let ids: Vec<i64> = tracker
            .iter()
            .filter(|(_, o)| o.symbol == symbol)
            .map(|(id, _)| id)
            .collect();
        for id in &ids {
            if let Err(e) = self
                .ledger
                .update_status(*id, crate::models::OrderStatus::Cancelled)
                .await
            {
                tracing::error!(order_id = id, error = %e, "failed to persist cancellation");
            }
            tracker.remove(*id);
        }

        tracing::info!(symbol, cancelled = ids.len(), "cancelled all open orders");
        Ok(ids.len())
    }

    /// Register a leg in the tracker and persist it. A persistence failure
    /// is logged and skipped; the order is live regardless and the next
    /// reconciliation pass sees it in the broker snapshot.
    async fn register(
        &self,
        tracker: &mut OrderTracker,
        order_id: i64,
        request: &OrderRequest,
        parent_id: Option<i64>,
    ) {
        tracker.insert(
            order_id,
            TrackedOrder {
                symbol: request.symbol.clone(),
                action: request.action,
                quantity: request.quantity,
                price: request.limit_price,
                parent_id,
            },
        );
        if let Err(e) = self
            .ledger
            .record_order(
                &request.symbol,
                request.action,
                request.limit_price,
                request.quantity,
                Some(order_id),
            )
            .await
        {
            tracing::error!(order_id, error = %e, "failed to persist order, will retry via sync");
        }
    }
}

fn apply_session(request: &mut OrderRequest, period: TradingPeriod) {
    request.outside_rth = period.extended_hours();
    request.overnight = period.overnight_routing();
}
