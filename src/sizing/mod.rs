//! Position sizing: turns available cash and the current price into a lot
//! size (shares per grid rung) and the price interval between rungs.

use crate::{GridError, Result};

/// Result of a sizing calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    /// Shares per grid rung, always >= 1.
    pub lot_size: i64,
    /// Price spacing between consecutive rungs; 0 when there is not enough
    /// cash to space a grid.
    pub interval: f64,
}

/// Round a price to cents before submission.
pub fn round_price(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

/// Compute lot size and grid interval from the trading plan formula:
///
/// ```text
/// lot_size  = floor((cash + crash_pct * price) / (crash_pct * range_fraction * price^2))
/// intervals = floor(cash / (lot_size * range_fraction * price))
/// interval  = crash_pct * price / (intervals - 1)
/// ```
///
/// Out-of-range inputs fail with `InvalidInput`. If an intermediate value is
/// non-finite or a denominator collapses, the calculation degrades to a flat
/// 1%-of-cash lot with a 1%-of-price interval rather than failing.
pub fn size(cash: f64, price: f64, crash_pct: f64, range_fraction: f64) -> Result<Sizing> {
    if !(price > 0.0) {
        return Err(GridError::InvalidInput("price must be positive"));
    }
    if !(cash > 0.0) {
        return Err(GridError::InvalidInput("cash must be positive"));
    }
    if !(crash_pct > 0.0 && crash_pct < 1.0) {
        return Err(GridError::InvalidInput("crash_pct must be in (0, 1)"));
    }
    if !(range_fraction > 0.0 && range_fraction < 1.0) {
        return Err(GridError::InvalidInput("range_fraction must be in (0, 1)"));
    }

    match plan_formula(cash, price, crash_pct, range_fraction) {
        Some(sizing) => Ok(sizing),
        None => {
            tracing::warn!(
                cash,
                price,
                "plan formula produced a non-finite value, using degraded sizing"
            );
            Ok(degraded(cash, price))
        }
    }
}

/// The exact plan formula. Returns `None` when a denominator is <= 0 or any
/// intermediate value is NaN/infinite, which routes the caller onto the
/// degraded path.
fn plan_formula(cash: f64, price: f64, crash_pct: f64, range_fraction: f64) -> Option<Sizing> {
    let numerator = cash + crash_pct * price;
    let denominator = crash_pct * range_fraction * price * price;
    if !(denominator > 0.0) || !denominator.is_finite() {
        return None;
    }

    let raw_lot = numerator / denominator;
    if !raw_lot.is_finite() {
        return None;
    }
    let lot_size = (raw_lot.floor() as i64).max(1);

    let interval_cost = lot_size as f64 * range_fraction * price;
    if !(interval_cost > 0.0) {
        return None;
    }

    let intervals = (cash / interval_cost).floor();
    let interval = if intervals <= 1.0 {
        // Not enough cash to space a grid.
        0.0
    } else {
        let interval = crash_pct * price / (intervals - 1.0);
        if !interval.is_finite() {
            return None;
        }
        interval
    };

    Some(Sizing { lot_size, interval })
}

/// Availability-over-precision fallback: 1% of cash per rung (minimum one
/// share), rungs 1% of price apart.
fn degraded(cash: f64, price: f64) -> Sizing {
    Sizing {
        lot_size: ((cash * 0.01 / price).floor() as i64).max(1),
        interval: price * 0.01,
    }
}
