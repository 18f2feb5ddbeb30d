use serde::Deserialize;

use crate::{GridError, Result};

/// Bot configuration, loaded from a config file layered with `GRIDBOT_*`
/// environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// The single symbol this bot trades.
    pub symbol: String,
    /// Capital allocated to the strategy.
    pub strategy_budget: f64,

    #[serde(default = "defaults::paper_trading")]
    pub paper_trading: bool,
    #[serde(default = "defaults::client_id")]
    pub client_id: i32,
    #[serde(default = "defaults::gateway_port")]
    pub gateway_port: u16,

    /// Assumed worst-case drawdown the grid must survive, in (0, 1).
    #[serde(default = "defaults::crash_pct")]
    pub crash_pct: f64,
    /// Fraction of the crash range one rung's cost occupies, in (0, 1).
    #[serde(default = "defaults::range_fraction")]
    pub range_fraction: f64,
    /// Take-profit distance for bracket children.
    #[serde(default = "defaults::profit_pct")]
    pub profit_pct: f64,
    /// Last-resort price when no live quote and no persisted price exist.
    #[serde(default = "defaults::fallback_price")]
    pub fallback_price: f64,
    /// Below this available cash, order placement is skipped for the cycle.
    #[serde(default = "defaults::cash_floor")]
    pub cash_floor: f64,
    /// Number of grid rungs laid below the current price.
    #[serde(default = "defaults::grid_rungs")]
    pub grid_rungs: u32,
    /// Lot sizes are rounded down to a multiple of this unit.
    #[serde(default = "defaults::lot_rounding")]
    pub lot_rounding: i64,

    #[serde(default = "defaults::database_url")]
    pub database_url: String,

    #[serde(default = "defaults::cycle_pause_secs")]
    pub cycle_pause_secs: u64,
    #[serde(default = "defaults::low_cash_pause_secs")]
    pub low_cash_pause_secs: u64,
    #[serde(default = "defaults::error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Small delay between grid rung submissions.
    #[serde(default = "defaults::rung_delay_ms")]
    pub rung_delay_ms: u64,
    #[serde(default = "defaults::connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "defaults::connect_delay_secs")]
    pub connect_delay_secs: u64,
}

mod defaults {
    pub fn paper_trading() -> bool {
        true
    }
    pub fn client_id() -> i32 {
        1
    }
    pub fn gateway_port() -> u16 {
        4002
    }
    pub fn crash_pct() -> f64 {
        0.87
    }
    pub fn range_fraction() -> f64 {
        0.565
    }
    pub fn profit_pct() -> f64 {
        0.015
    }
    pub fn fallback_price() -> f64 {
        80.0
    }
    pub fn cash_floor() -> f64 {
        2_000.0
    }
    pub fn grid_rungs() -> u32 {
        5
    }
    pub fn lot_rounding() -> i64 {
        1
    }
    pub fn database_url() -> String {
        "sqlite://gridbot.db?mode=rwc".to_string()
    }
    pub fn cycle_pause_secs() -> u64 {
        30
    }
    pub fn low_cash_pause_secs() -> u64 {
        120
    }
    pub fn error_backoff_secs() -> u64 {
        60
    }
    pub fn rung_delay_ms() -> u64 {
        2_000
    }
    pub fn connect_attempts() -> u32 {
        3
    }
    pub fn connect_delay_secs() -> u64 {
        5
    }
}

impl BotConfig {
    /// Load from a config file (TOML/YAML/JSON by extension), then apply
    /// `GRIDBOT_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GRIDBOT"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(GridError::InvalidInput("symbol must not be empty"));
        }
        if !(self.strategy_budget > 0.0) {
            return Err(GridError::InvalidInput("strategy_budget must be positive"));
        }
        if !(self.crash_pct > 0.0 && self.crash_pct < 1.0) {
            return Err(GridError::InvalidInput("crash_pct must be in (0, 1)"));
        }
        if !(self.range_fraction > 0.0 && self.range_fraction < 1.0) {
            return Err(GridError::InvalidInput("range_fraction must be in (0, 1)"));
        }
        if !(self.profit_pct > 0.0) {
            return Err(GridError::InvalidInput("profit_pct must be positive"));
        }
        if self.lot_rounding < 1 {
            return Err(GridError::InvalidInput("lot_rounding must be >= 1"));
        }
        if self.grid_rungs == 0 {
            return Err(GridError::InvalidInput("grid_rungs must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<BotConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let config: BotConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = from_toml(
            r#"
            symbol = "PLTR"
            strategy_budget = 50000.0
            "#,
        )
        .unwrap();

        assert_eq!(config.symbol, "PLTR");
        assert!(config.paper_trading);
        assert_eq!(config.gateway_port, 4002);
        assert_eq!(config.crash_pct, 0.87);
        assert_eq!(config.range_fraction, 0.565);
        assert_eq!(config.profit_pct, 0.015);
        assert_eq!(config.grid_rungs, 5);
        assert_eq!(config.cash_floor, 2_000.0);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = from_toml(
            r#"
            symbol = "MSFT"
            strategy_budget = 10000.0
            profit_pct = 0.02
            grid_rungs = 8
            paper_trading = false
            "#,
        )
        .unwrap();

        assert_eq!(config.profit_pct, 0.02);
        assert_eq!(config.grid_rungs, 8);
        assert!(!config.paper_trading);
    }

    #[test]
    fn out_of_range_parameters_rejected() {
        let result = from_toml(
            r#"
            symbol = "PLTR"
            strategy_budget = 50000.0
            crash_pct = 1.5
            "#,
        );
        assert!(matches!(result, Err(GridError::InvalidInput(_))));

        let result = from_toml(
            r#"
            symbol = ""
            strategy_budget = 50000.0
            "#,
        );
        assert!(matches!(result, Err(GridError::InvalidInput(_))));
    }
}
