use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::bracket::{BracketCoordinator, Placement};
use crate::broker::BrokerGateway;
use crate::config::BotConfig;
use crate::ledger::Ledger;
use crate::models::{OrderStatus, PriceSource};
use crate::reconcile::Reconciler;
use crate::session::TradingPeriod;
use crate::sizing::{self, round_price};
use crate::tracker::OrderTracker;
use crate::{GridError, OrderAction, Result};

/// Fixed-delay retry policy. The delay between attempts is interruptible
/// through a shutdown watch channel.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl BackoffPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `op` up to `attempts` times. The last error wins; a shutdown
    /// signal during the inter-attempt delay aborts with a broker error.
    pub async fn retry<T, F, Fut>(
        &self,
        what: &str,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt == attempts => {
                    tracing::error!(what, attempt, error = %e, "giving up");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(what, attempt, error = %e, "attempt failed, retrying");
                }
            }

            match shutdown.as_deref_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {}
                        _ = rx.changed() => {
                            if *rx.borrow() {
                                return Err(GridError::Broker(format!(
                                    "{what} aborted by shutdown"
                                )));
                            }
                        }
                    }
                }
                None => tokio::time::sleep(self.delay).await,
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }
}

/// The cycle's verdict on how long to pause before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Normal,
    LowCash,
    MarketClosed,
}

/// Owns the broker connection, the ledger, and the in-memory tracker, and
/// drives the place/fill/reconcile cycle until shut down.
pub struct TradingLoop<B: BrokerGateway> {
    broker: B,
    ledger: Ledger,
    tracker: OrderTracker,
    config: BotConfig,
    shutdown: watch::Receiver<bool>,
}

impl<B: BrokerGateway> TradingLoop<B> {
    pub fn new(
        broker: B,
        ledger: Ledger,
        config: BotConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            ledger,
            tracker: OrderTracker::new(),
            config,
            shutdown,
        }
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Connect, qualify the contract, and align tracker and ledger with the
    /// broker before the first cycle.
    pub async fn startup(&mut self) -> Result<()> {
        let policy = BackoffPolicy::new(
            self.config.connect_attempts,
            Duration::from_secs(self.config.connect_delay_secs),
        );
        let broker = &self.broker;
        let mut shutdown = self.shutdown.clone();
        policy
            .retry("broker connect", Some(&mut shutdown), || broker.connect())
            .await?;

        let instrument = self.broker.qualify(&self.config.symbol).await?;
        let funds = self.broker.available_funds().await?;
        tracing::info!(
            symbol = %instrument.symbol,
            exchange = %instrument.exchange,
            funds,
            "contract qualified"
        );

        let report = Reconciler::new(&self.broker, &self.ledger)
            .sync(&mut self.tracker, &self.config.symbol)
            .await?;
        tracing::info!(tracked = report.seen, "startup sync complete");

        let position = self.broker.net_position(&self.config.symbol).await?;
        self.ledger
            .upsert_position(&self.config.symbol, position)
            .await?;

        Ok(())
    }

    /// Main loop. Cycle errors are logged and answered with a longer pause;
    /// only shutdown ends the loop.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let pause = match self.cycle().await {
                Ok(pause) => self.pause_duration(pause),
                Err(e) => {
                    tracing::error!(error = %e, "cycle failed, backing off");
                    Duration::from_secs(self.config.error_backoff_secs)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("trading loop stopped");
        self.broker.disconnect().await;
        Ok(())
    }

    fn pause_duration(&self, pause: Pause) -> Duration {
        match pause {
            // A closed market gets the ordinary pause; the session is
            // re-sampled every cycle anyway.
            Pause::Normal | Pause::MarketClosed => {
                Duration::from_secs(self.config.cycle_pause_secs)
            }
            Pause::LowCash => Duration::from_secs(self.config.low_cash_pause_secs),
        }
    }

    pub async fn cycle(&mut self) -> Result<Pause> {
        self.cycle_at(TradingPeriod::now()).await
    }

    /// One pass: process fills, reconcile against the broker snapshot, then
    /// decide whether to enter or lay the grid. Fill processing always runs
    /// before reconciliation so terminal transitions land ahead of the
    /// snapshot diff, and both run before any sizing so committed cash and
    /// open-order counts reflect reality.
    pub async fn cycle_at(&mut self, period: TradingPeriod) -> Result<Pause> {
        let symbol = self.config.symbol.clone();

        self.process_fills(&symbol).await;
        Reconciler::new(&self.broker, &self.ledger)
            .sync(&mut self.tracker, &symbol)
            .await?;

        let price = self.refresh_price(&symbol).await;
        let committed = self.ledger.committed_cash(&symbol).await?;
        let realized = self.ledger.realized_pnl(&symbol).await?;
        let available = self.config.strategy_budget + realized - committed;

        let position = self.broker.net_position(&symbol).await?;
        self.ledger.upsert_position(&symbol, position).await?;
        let open_buys = self.ledger.count_open_orders(&symbol, OrderAction::Buy).await?;

        tracing::info!(
            symbol,
            price,
            available,
            committed,
            realized,
            position,
            open_buys,
            period = %period,
            "cycle"
        );

        // A flat account always re-enters, even while grid buys still rest
        // below the market; otherwise the bot stalls after a take-profit
        // sells off the whole position.
        if position == 0 {
            return self.enter(&symbol, price, available, period).await;
        }
        if open_buys == 0 {
            return self.lay_grid(&symbol, price, available, period).await;
        }

        Ok(Pause::Normal)
    }

    /// Best live price, falling back to the last persisted price, then the
    /// configured floor value. A fresh quote is persisted for next time.
    async fn refresh_price(&self, symbol: &str) -> f64 {
        match self.broker.fetch_price(symbol).await {
            Ok(quote) => {
                if quote.source == PriceSource::HistoricalBar {
                    tracing::warn!(symbol, price = quote.price, "live quote unavailable, using last bar");
                }
                if let Err(e) = self.ledger.set_latest_price(symbol, quote.price).await {
                    tracing::warn!(symbol, error = %e, "could not persist latest price");
                }
                quote.price
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "price fetch failed, falling back");
                match self.ledger.latest_price(symbol).await {
                    Ok(Some(price)) => price,
                    Ok(None) => self.config.fallback_price,
                    Err(e) => {
                        tracing::warn!(symbol, error = %e, "stored price unavailable");
                        self.config.fallback_price
                    }
                }
            }
        }
    }

    /// Flat with no resting buys: open the position with a market bracket.
    async fn enter(
        &mut self,
        symbol: &str,
        price: f64,
        available: f64,
        period: TradingPeriod,
    ) -> Result<Pause> {
        if available < self.config.cash_floor {
            tracing::info!(available, floor = self.config.cash_floor, "cash below floor, not entering");
            return Ok(Pause::LowCash);
        }

        let sizing = sizing::size(
            available,
            price,
            self.config.crash_pct,
            self.config.range_fraction,
        )?;
        let lot = self.rounded_lot(sizing.lot_size);

        let coordinator =
            BracketCoordinator::new(&self.broker, &self.ledger, self.config.profit_pct);
        match coordinator
            .place_market_bracket(&mut self.tracker, symbol, lot, period)
            .await?
        {
            Placement::Placed { parent_id, .. } => {
                tracing::info!(symbol, lot, parent_id, "entry bracket placed");
                Ok(Pause::Normal)
            }
            Placement::MarketClosed => Ok(Pause::MarketClosed),
        }
    }

    /// Holding a position with no resting buys: lay limit brackets at fixed
    /// intervals below the current price.
    async fn lay_grid(
        &mut self,
        symbol: &str,
        price: f64,
        available: f64,
        period: TradingPeriod,
    ) -> Result<Pause> {
        if available < self.config.cash_floor {
            tracing::info!(available, floor = self.config.cash_floor, "cash below floor, grid not laid");
            return Ok(Pause::LowCash);
        }
        if !period.may_place_orders() {
            return Ok(Pause::MarketClosed);
        }

        let sizing = sizing::size(
            available,
            price,
            self.config.crash_pct,
            self.config.range_fraction,
        )?;
        let lot = self.rounded_lot(sizing.lot_size);

        let coordinator =
            BracketCoordinator::new(&self.broker, &self.ledger, self.config.profit_pct);
        let mut placed = 0u32;
        for rung in 1..=self.config.grid_rungs {
            let rung_price = round_price(price - sizing.interval * rung as f64);
            if rung_price <= 0.0 {
                break;
            }
            match coordinator
                .place_bracket(&mut self.tracker, symbol, lot, rung_price, period)
                .await
            {
                Ok(Placement::Placed { .. }) => placed += 1,
                Ok(Placement::MarketClosed) => break,
                // An orphaned parent stays live; surface it and stop laying
                // rungs so the next sync sees a stable picture.
                Err(e) => {
                    tracing::error!(symbol, rung, error = %e, "rung placement failed");
                    break;
                }
            }
            if rung < self.config.grid_rungs {
                tokio::time::sleep(Duration::from_millis(self.config.rung_delay_ms)).await;
            }
        }

        tracing::info!(symbol, placed, lot, interval = sizing.interval, "grid laid");
        Ok(Pause::Normal)
    }

    /// Poll every tracked order and apply terminal transitions. Per-order
    /// failures are logged and skipped; one bad order must not stall the
    /// rest.
    async fn process_fills(&mut self, symbol: &str) {
        for order_id in self.tracker.order_ids() {
            let report = match self.broker.order_status(order_id).await {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(order_id, error = %e, "status poll failed");
                    continue;
                }
            };

            match report.status {
                OrderStatus::Open => {}
                OrderStatus::Filled => {
                    if let Err(e) = self.apply_fill(symbol, order_id, &report).await {
                        tracing::warn!(order_id, error = %e, "fill bookkeeping failed");
                    }
                }
                OrderStatus::Cancelled | OrderStatus::Inactive => {
                    if let Err(e) = self.ledger.update_status(order_id, report.status).await {
                        tracing::warn!(order_id, error = %e, "status update failed");
                    }
                    self.tracker.remove(order_id);
                }
            }
        }
    }

    async fn apply_fill(
        &mut self,
        symbol: &str,
        order_id: i64,
        report: &crate::models::OrderStatusReport,
    ) -> Result<()> {
        let Some(tracked) = self.tracker.get(order_id).cloned() else {
            return Ok(());
        };

        let quantity = if report.filled_quantity > 0 {
            report.filled_quantity
        } else {
            tracked.quantity
        };

        self.ledger
            .record_fill(
                symbol,
                tracked.action,
                report.avg_fill_price,
                quantity,
                Some(order_id),
            )
            .await?;
        self.ledger.update_status(order_id, OrderStatus::Filled).await?;

        if tracked.action == OrderAction::Sell {
            let realized = self
                .ledger
                .record_realized_pnl(symbol, report.avg_fill_price, quantity)
                .await?;
            tracing::info!(
                symbol,
                order_id,
                price = report.avg_fill_price,
                quantity,
                realized,
                "sell filled, profit booked"
            );
        } else {
            tracing::info!(
                symbol,
                order_id,
                price = report.avg_fill_price,
                quantity,
                "buy filled"
            );
        }

        let position = self.broker.net_position(symbol).await?;
        self.ledger.upsert_position(symbol, position).await?;
        self.tracker.remove(order_id);

        Ok(())
    }

    fn rounded_lot(&self, lot: i64) -> i64 {
        let unit = self.config.lot_rounding.max(1);
        ((lot / unit) * unit).max(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::sim::SimBroker;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> BotConfig {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                symbol = "PLTR"
                strategy_budget = 50000.0
                grid_rungs = 3
                rung_delay_ms = 0
                connect_attempts = 3
                connect_delay_secs = 0
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        settings.try_deserialize().unwrap()
    }

    async fn test_loop(broker: SimBroker) -> (TradingLoop<SimBroker>, watch::Sender<bool>) {
        let ledger = Ledger::open("sqlite::memory:").await.unwrap();
        let (tx, rx) = watch::channel(false);
        (TradingLoop::new(broker, ledger, test_config(), rx), tx)
    }

    #[tokio::test]
    async fn backoff_returns_first_success() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::new(3, Duration::ZERO);
        let result: Result<u32> = policy
            .retry("op", None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(GridError::Broker("not yet".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backoff_surfaces_last_error_after_exhaustion() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::new(3, Duration::ZERO);
        let result: Result<()> = policy
            .retry("op", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GridError::Broker("still down".into())) }
            })
            .await;
        assert!(matches!(result, Err(GridError::Broker(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn startup_retries_connect() {
        let broker = SimBroker::new(50_000.0);
        broker.fail_connects(2);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
    }

    #[tokio::test]
    async fn flat_account_enters_with_market_bracket() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
        let pause = trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        assert_eq!(pause, Pause::Normal);
        // Parent plus take-profit child.
        assert_eq!(trading.tracker().len(), 2);
        assert_eq!(trading.broker.open_count(), 2);
        assert_eq!(
            trading
                .ledger
                .count_open_orders("PLTR", OrderAction::Buy)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn closed_market_defers_entry() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
        let pause = trading.cycle_at(TradingPeriod::Closed).await.unwrap();

        assert_eq!(pause, Pause::MarketClosed);
        assert!(trading.tracker().is_empty());
    }

    #[tokio::test]
    async fn flat_account_reenters_with_resting_grid_buys() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();

        // A grid buy resting below the market, left over from before the
        // take-profit sold off the whole position.
        let resting = trading
            .broker()
            .place_order(&crate::broker::OrderRequest::limit(
                "PLTR",
                OrderAction::Buy,
                10,
                95.0,
            ))
            .await
            .unwrap();
        trading
            .ledger()
            .record_order("PLTR", OrderAction::Buy, Some(95.0), 10, Some(resting))
            .await
            .unwrap();

        let pause = trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        // Flat means enter, resting buys or not.
        assert_eq!(pause, Pause::Normal);
        assert!(trading.tracker().contains(resting));
        assert_eq!(trading.tracker().len(), 3);
        assert_eq!(trading.broker().open_count(), 3);
    }

    #[tokio::test]
    async fn closed_market_pause_matches_cycle_pause() {
        let broker = SimBroker::new(50_000.0);
        let (trading, _tx) = test_loop(broker).await;

        assert_eq!(
            trading.pause_duration(Pause::MarketClosed),
            Duration::from_secs(trading.config.cycle_pause_secs)
        );
        assert_eq!(
            trading.pause_duration(Pause::LowCash),
            Duration::from_secs(trading.config.low_cash_pause_secs)
        );
    }

    #[tokio::test]
    async fn low_cash_skips_placement() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
        trading.config.strategy_budget = 1_500.0;
        let pause = trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        assert_eq!(pause, Pause::LowCash);
        assert!(trading.tracker().is_empty());
    }

    #[tokio::test]
    async fn positioned_account_lays_grid() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);
        broker.set_position("PLTR", 10);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
        let pause = trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        assert_eq!(pause, Pause::Normal);
        // Three rungs, each a parent/child pair.
        assert_eq!(trading.tracker().len(), 6);
        assert_eq!(trading.tracker().count("PLTR", OrderAction::Buy), 3);
        assert_eq!(trading.tracker().count("PLTR", OrderAction::Sell), 3);
        assert_eq!(trading.ledger.position("PLTR").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn sell_fill_books_profit_and_clears_tracker() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, _tx) = test_loop(broker).await;
        trading.startup().await.unwrap();
        trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        let ids = trading.tracker().order_ids();
        let (parent_id, child_id) = {
            let parent = *ids
                .iter()
                .find(|id| trading.tracker().get(**id).unwrap().parent_id.is_none())
                .unwrap();
            let child = *ids.iter().find(|id| **id != parent).unwrap();
            (parent, child)
        };

        trading.broker.fill_order(parent_id, 100.0);
        trading.cycle_at(TradingPeriod::Regular).await.unwrap();
        assert!(!trading.tracker().contains(parent_id));

        trading.broker.fill_order(child_id, 101.5);
        trading.cycle_at(TradingPeriod::Regular).await.unwrap();

        assert!(!trading.tracker().contains(child_id));
        let pnl = trading.ledger.realized_pnl("PLTR").await.unwrap();
        assert!(pnl > 0.0, "expected booked profit, got {pnl}");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let broker = SimBroker::new(50_000.0);
        broker.set_quote(100.0, PriceSource::Trade);

        let (mut trading, tx) = test_loop(broker).await;
        tx.send(true).unwrap();
        trading.run().await.unwrap();
    }
}
