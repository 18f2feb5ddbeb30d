//! Trading-period classification for US equities, sampled on demand from
//! the exchange wall clock (US/Eastern). Weekends are closed. The session
//! boundaries sit slightly inside the exchange ones on purpose, leaving a
//! margin around each open and close.

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};

/// Current session classification. Decides whether an order may be placed
/// at all, whether a market order is permitted (regular hours only), and
/// whether an order needs the extended-hours flag or overnight routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingPeriod {
    PreMarket,
    Regular,
    AfterHours,
    Overnight,
    Closed,
}

impl TradingPeriod {
    /// Classify the current wall-clock instant.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Classify an arbitrary instant, evaluated in US/Eastern.
    pub fn at(instant: DateTime<Utc>) -> Self {
        let eastern = instant.with_timezone(&Eastern);
        // Saturday/Sunday
        if eastern.weekday().number_from_monday() >= 6 {
            return TradingPeriod::Closed;
        }

        let t = eastern.time();
        let between = |h1: u32, m1: u32, h2: u32, m2: u32| {
            t >= hm(h1, m1) && t < hm(h2, m2)
        };

        if between(4, 5, 7, 30) {
            TradingPeriod::PreMarket
        } else if between(9, 31, 15, 57) {
            TradingPeriod::Regular
        } else if between(16, 10, 19, 45) {
            TradingPeriod::AfterHours
        } else if t >= hm(20, 15) || t < hm(3, 45) {
            TradingPeriod::Overnight
        } else {
            TradingPeriod::Closed
        }
    }

    /// Whether any order may be placed.
    pub fn may_place_orders(self) -> bool {
        self != TradingPeriod::Closed
    }

    /// Market orders are only permitted during the regular session.
    pub fn market_orders_allowed(self) -> bool {
        self == TradingPeriod::Regular
    }

    /// Orders in these windows must carry the extended-hours flag.
    pub fn extended_hours(self) -> bool {
        matches!(self, TradingPeriod::PreMarket | TradingPeriod::AfterHours)
    }

    /// Orders in this window route to the overnight venue.
    pub fn overnight_routing(self) -> bool {
        self == TradingPeriod::Overnight
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradingPeriod::PreMarket => "pre-market",
            TradingPeriod::Regular => "regular",
            TradingPeriod::AfterHours => "after-hours",
            TradingPeriod::Overnight => "overnight",
            TradingPeriod::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TradingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_else(|| {
        // Boundaries are compile-time constants; keep the fallback total.
        NaiveTime::from_num_seconds_from_midnight_opt(hour * 3600 + minute * 60, 0)
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Build a UTC instant from an Eastern wall-clock time.
    fn eastern(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn weekday_sessions_classify_by_wall_clock() {
        // 2026-08-28 is a Friday.
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 5, 0)), TradingPeriod::PreMarket);
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 10, 30)), TradingPeriod::Regular);
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 17, 0)), TradingPeriod::AfterHours);
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 22, 0)), TradingPeriod::Overnight);
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 2, 0)), TradingPeriod::Overnight);
    }

    #[test]
    fn gaps_between_sessions_are_closed() {
        // Between pre-market close (07:30) and regular open (09:31).
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 8, 30)), TradingPeriod::Closed);
        // Between regular close (15:57) and after-hours open (16:10).
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 16, 0)), TradingPeriod::Closed);
        // Between after-hours close (19:45) and overnight open (20:15).
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 20, 0)), TradingPeriod::Closed);
        // Between overnight close (03:45) and pre-market open (04:05).
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 28, 3, 50)), TradingPeriod::Closed);
    }

    #[test]
    fn weekends_are_closed_in_every_window() {
        // 2026-08-29 is a Saturday: even mid-regular-hours is closed.
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 29, 10, 30)), TradingPeriod::Closed);
        assert_eq!(TradingPeriod::at(eastern(2026, 8, 30, 22, 0)), TradingPeriod::Closed);
    }

    #[test]
    fn policy_predicates() {
        assert!(TradingPeriod::Regular.market_orders_allowed());
        assert!(!TradingPeriod::PreMarket.market_orders_allowed());
        assert!(TradingPeriod::PreMarket.extended_hours());
        assert!(TradingPeriod::AfterHours.extended_hours());
        assert!(!TradingPeriod::Overnight.extended_hours());
        assert!(TradingPeriod::Overnight.overnight_routing());
        assert!(!TradingPeriod::Closed.may_place_orders());
        assert!(TradingPeriod::Overnight.may_place_orders());
    }
}
