use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridError>;

/// Error taxonomy for the grid engine.
///
/// Only `Connection` (at startup, retries exhausted) and `Config` are fatal.
/// Everything else is recovered inside the trading loop: prices fall back,
/// sizing degrades, malformed broker records are skipped, persistence
/// failures are retried next cycle.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("gateway unreachable: {0}")]
    Connection(String),

    #[error("no usable price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("invalid sizing input: {0}")]
    InvalidInput(&'static str),

    #[error("malformed broker record: {0}")]
    MalformedRecord(String),

    #[error("bracket child failed, parent order {parent_id} is live and unmatched: {reason}")]
    OrphanedParent { parent_id: i64, reason: String },

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("broker rejected request: {0}")]
    Broker(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
