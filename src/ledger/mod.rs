//! Durable order ledger over SQLite: the system of record for orders,
//! fills, positions, realized PnL and the last observed price.
//!
//! Every write is idempotent: `record_order`/`record_fill` dedup by broker
//! id when present, otherwise by the (symbol, action, price, quantity)
//! attribute tuple, so duplicate broker notifications cannot corrupt cash
//! or PnL totals. The pool is shared but no transaction spans a trading
//! cycle, so a crash mid-cycle never corrupts committed rows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::models::{FillRecord, OrderAction, OrderRecord, OrderStatus};
use crate::Result;

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger database and bootstrap the schema.
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://gridbot.db?mode=rwc` or `sqlite::memory:`
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let ledger = Self { pool };
        ledger.create_tables().await?;

        tracing::info!("Ledger opened at {}", database_url);

        Ok(ledger)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                price REAL,
                quantity INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                broker_order_id INTEGER UNIQUE,
                status TEXT NOT NULL DEFAULT 'Open'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                trade_id INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pnl (
                symbol TEXT PRIMARY KEY,
                realized REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS latest_prices (
                symbol TEXT PRIMARY KEY,
                price REAL NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an order as Open. Returns `false` without writing if a row
    /// already matches the broker id or, absent one, the attribute tuple.
    ///
    /// Known approximation: two genuinely distinct orders at the same
    /// (symbol, action, price, quantity) with no broker id yet collapse
    /// into one row. Broadening the key is an open decision; see DESIGN.md.
    pub async fn record_order(
        &self,
        symbol: &str,
        action: OrderAction,
        price: Option<f64>,
        quantity: i64,
        broker_order_id: Option<i64>,
    ) -> Result<bool> {
        if self.order_exists(symbol, action, price, quantity, broker_order_id).await? {
            tracing::debug!(symbol, %action, ?price, quantity, "order already recorded, skipping");
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO orders (symbol, action, price, quantity, created_at, broker_order_id, status)
            VALUES (?, ?, ?, ?, ?, ?, 'Open')
            "#,
        )
        .bind(symbol)
        .bind(action.as_str())
        .bind(price)
        .bind(quantity)
        .bind(Utc::now())
        .bind(broker_order_id)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    /// Record a fill. Same dedup rule as `record_order`, keyed by trade id
    /// (the broker order id of the filled order) when present.
    pub async fn record_fill(
        &self,
        symbol: &str,
        action: OrderAction,
        price: f64,
        quantity: i64,
        trade_id: Option<i64>,
    ) -> Result<bool> {
        if self.fill_exists(symbol, action, price, quantity, trade_id).await? {
            tracing::debug!(symbol, %action, price, quantity, "fill already recorded, skipping");
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO trades (symbol, action, price, quantity, created_at, trade_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(action.as_str())
        .bind(price)
        .bind(quantity)
        .bind(Utc::now())
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    async fn order_exists(
        &self,
        symbol: &str,
        action: OrderAction,
        price: Option<f64>,
        quantity: i64,
        broker_order_id: Option<i64>,
    ) -> Result<bool> {
        // A broker id is the dedup key when present. The attribute tuple is
        // a fallback for id-less records only; two distinct orders with
        // distinct broker ids may legitimately share price and quantity.
        if let Some(id) = broker_order_id {
            let row = sqlx::query("SELECT 1 FROM orders WHERE broker_order_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(row.is_some());
        }

        let row = sqlx::query(
            "SELECT 1 FROM orders WHERE symbol = ? AND action = ? AND price IS ? AND quantity = ?",
        )
        .bind(symbol)
        .bind(action.as_str())
        .bind(price)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn fill_exists(
        &self,
        symbol: &str,
        action: OrderAction,
        price: f64,
        quantity: i64,
        trade_id: Option<i64>,
    ) -> Result<bool> {
        // Same rule as `order_exists`: a trade id is authoritative, the
        // tuple only deduplicates synthetic id-less fills.
        if let Some(id) = trade_id {
            let row = sqlx::query("SELECT 1 FROM trades WHERE trade_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            return Ok(row.is_some());
        }

        let row = sqlx::query(
            "SELECT 1 FROM trades WHERE symbol = ? AND action = ? AND price = ? AND quantity = ?",
        )
        .bind(symbol)
        .bind(action.as_str())
        .bind(price)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Move an order out of Open. Transitions are monotone: a row already
    /// in a terminal state is never touched, so a fill recorded this cycle
    /// cannot later be downgraded to a cancellation. Returns whether a row
    /// actually transitioned.
    pub async fn update_status(&self, broker_order_id: i64, status: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = ? WHERE broker_order_id = ? AND status = 'Open'",
        )
        .bind(status.as_str())
        .bind(broker_order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cash reserved by currently Open BUY orders: sum(price * quantity).
    /// Market orders (no price) contribute nothing until they fill.
    pub async fn committed_cash(&self, symbol: &str) -> Result<f64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(price * quantity), 0.0) AS committed
            FROM orders
            WHERE symbol = ? AND action = 'BUY' AND status = 'Open'
            "#,
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("committed"))
    }

    /// Book realized PnL for a SELL fill against the average price of all
    /// recorded BUY fills to date (not a FIFO/LIFO lot match). Returns the
    /// amount booked.
    pub async fn record_realized_pnl(
        &self,
        symbol: &str,
        sell_price: f64,
        quantity: i64,
    ) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(AVG(price), 0.0) AS avg_buy FROM trades WHERE symbol = ? AND action = 'BUY'",
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;
        let avg_buy: f64 = row.get("avg_buy");

        let realized = (sell_price - avg_buy) * quantity as f64;
        let updated = self.realized_pnl(symbol).await? + realized;

        sqlx::query(
            r#"
            INSERT INTO pnl (symbol, realized) VALUES (?, ?)
            ON CONFLICT(symbol) DO UPDATE SET realized = excluded.realized
            "#,
        )
        .bind(symbol)
        .bind(updated)
        .execute(&self.pool)
        .await?;

        tracing::info!(symbol, sell_price, quantity, realized, "booked realized PnL");

        Ok(realized)
    }

    /// Cumulative realized PnL for a symbol.
    pub async fn realized_pnl(&self, symbol: &str) -> Result<f64> {
        let row = sqlx::query("SELECT realized FROM pnl WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("realized")).unwrap_or(0.0))
    }

    /// All orders still marked Open for a symbol, newest first.
    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT local_id, symbol, action, price, quantity, created_at, broker_order_id, status
            FROM orders
            WHERE symbol = ? AND status = 'Open'
            ORDER BY created_at DESC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| parse_order_row(&row)).collect()
    }

    /// Count open orders for a symbol and side.
    pub async fn count_open_orders(&self, symbol: &str, action: OrderAction) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM orders WHERE symbol = ? AND action = ? AND status = 'Open'",
        )
        .bind(symbol)
        .bind(action.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    /// Recent fills for a symbol, newest first.
    pub async fn fills(&self, symbol: &str, limit: i64) -> Result<Vec<FillRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT local_id, symbol, action, price, quantity, created_at, trade_id
            FROM trades
            WHERE symbol = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let action: String = row.get("action");
                Ok(FillRecord {
                    local_id: row.get("local_id"),
                    symbol: row.get("symbol"),
                    action: OrderAction::parse(&action)
                        .ok_or(crate::GridError::MalformedRecord(action))?,
                    price: row.get("price"),
                    quantity: row.get("quantity"),
                    created_at: row.get("created_at"),
                    trade_id: row.get("trade_id"),
                })
            })
            .collect()
    }

    /// Signed net position for a symbol, 0 when unknown.
    pub async fn position(&self, symbol: &str) -> Result<i64> {
        let row = sqlx::query("SELECT quantity FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("quantity")).unwrap_or(0))
    }

    /// Replace the stored net position with the broker's authoritative
    /// value. Recomputed from the broker, not accumulated locally, so any
    /// drift self-heals on the next refresh.
    pub async fn upsert_position(&self, symbol: &str, quantity: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, quantity) VALUES (?, ?)
            ON CONFLICT(symbol) DO UPDATE SET quantity = excluded.quantity
            "#,
        )
        .bind(symbol)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last observed price, used as a fallback when no live quote is
    /// available.
    pub async fn latest_price(&self, symbol: &str) -> Result<Option<f64>> {
        let row = sqlx::query("SELECT price FROM latest_prices WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("price")))
    }

    pub async fn set_latest_price(&self, symbol: &str, price: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO latest_prices (symbol, price, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at
            "#,
        )
        .bind(symbol)
        .bind(price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Maintenance purge of old order rows.
    ///
    /// Faithful to the source system: the cutoff is "now" computed at call
    /// time, so every row for the symbol matches `created_at < cutoff` and
    /// is deleted, Open or not. Nothing wires this into the trading loop;
    /// it exists for parity and is flagged in DESIGN.md.
    pub async fn purge_old_orders(&self, symbol: &str) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now();
        let result = sqlx::query("DELETE FROM orders WHERE symbol = ? AND created_at < ?")
            .bind(symbol)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every row from every table. Test and maintenance use only.
    pub async fn clear_all(&self) -> Result<()> {
        for table in ["orders", "trades", "positions", "pnl", "latest_prices"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

fn parse_order_row(row: &sqlx::sqlite::SqliteRow) -> Result<OrderRecord> {
    let action: String = row.get("action");
    let status: String = row.get("status");
    Ok(OrderRecord {
        local_id: row.get("local_id"),
        symbol: row.get("symbol"),
        action: OrderAction::parse(&action).ok_or(crate::GridError::MalformedRecord(action))?,
        price: row.get("price"),
        quantity: row.get("quantity"),
        created_at: row.get("created_at"),
        broker_order_id: row.get("broker_order_id"),
        status: OrderStatus::parse(&status).ok_or(crate::GridError::MalformedRecord(status))?,
    })
}
