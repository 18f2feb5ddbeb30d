// Core modules
pub mod bracket;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reconcile;
pub mod session;
pub mod sizing;
pub mod tracker;

// Re-export commonly used types
pub use error::{GridError, Result};
pub use models::{OrderAction, OrderStatus};
