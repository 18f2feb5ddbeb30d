//! Three-way reconciliation between the broker's open-order snapshot, the
//! in-memory tracker, and the durable ledger.
//!
//! The asymmetry is deliberate: the broker is authoritative for which
//! orders still *exist*, so the tracker is rebuilt wholesale from the
//! snapshot; the ledger is authoritative for *historical* status detail,
//! so an order that vanished from the snapshot is only marked Cancelled if
//! it is still Open — a fill recorded earlier is never downgraded.

use std::collections::{HashMap, HashSet};

use crate::broker::{BrokerGateway, BrokerOrder};
use crate::ledger::Ledger;
use crate::models::{OrderAction, OrderStatus};
use crate::tracker::{OrderTracker, TrackedOrder};
use crate::{GridError, Result};

/// What one sync pass did, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Valid snapshot entries matching the expected symbol.
    pub seen: usize,
    /// Ledger rows transitioned Open -> Cancelled.
    pub cancelled: usize,
    /// Malformed snapshot entries skipped.
    pub skipped: usize,
    /// Open BUY parents with no linked take-profit child.
    pub orphans: usize,
}

pub struct Reconciler<'a, B: BrokerGateway> {
    broker: &'a B,
    ledger: &'a Ledger,
}

impl<'a, B: BrokerGateway> Reconciler<'a, B> {
    pub fn new(broker: &'a B, ledger: &'a Ledger) -> Self {
        Self { broker, ledger }
    }

    /// Merge the broker's snapshot into the tracker and ledger for one
    /// symbol. Malformed snapshot entries are skipped and logged, never
    /// fatal to the pass.
    pub async fn sync(&self, tracker: &mut OrderTracker, symbol: &str) -> Result<SyncReport> {
        let snapshot = self
            .broker
            .open_order_snapshot()
            .await
            .map_err(|e| GridError::Reconciliation(e.to_string()))?;

        let mut report = SyncReport::default();
        let mut validated: Vec<BrokerOrder> = Vec::new();

        for raw in &snapshot {
            match BrokerOrder::from_raw(raw) {
                Ok(order) => validated.push(order),
                Err(reason) => {
                    report.skipped += 1;
                    tracing::warn!(reason, "skipping malformed broker record");
                }
            }
        }

        let matching: Vec<BrokerOrder> = validated
            .into_iter()
            .filter(|o| o.symbol == symbol)
            .collect();
        report.seen = matching.len();

        // Unmatched parents: an open BUY that no other open order points at
        // is a bracket whose child never made it out.
        let child_parents: HashSet<i64> =
            matching.iter().filter_map(|o| o.parent_id).collect();
        for order in &matching {
            if order.action == OrderAction::Buy && !child_parents.contains(&order.order_id) {
                report.orphans += 1;
                tracing::warn!(
                    order_id = order.order_id,
                    symbol,
                    "open BUY without linked take-profit child"
                );
            }
        }

        // The broker decides what exists: rebuild the tracker wholesale.
        let fresh: HashMap<i64, TrackedOrder> = matching
            .iter()
            .map(|o| {
                (
                    o.order_id,
                    TrackedOrder {
                        symbol: o.symbol.clone(),
                        action: o.action,
                        quantity: o.quantity,
                        price: o.price,
                        parent_id: o.parent_id,
                    },
                )
            })
            .collect();
        let previously_tracked = tracker.len();
        tracker.replace_all(fresh);

        // The ledger keeps history: anything it still lists as Open that
        // the broker no longer reports has terminated. Mark it Cancelled;
        // a later fill-detection pass supplies the finer detail when the
        // order actually filled.
        let snapshot_ids: HashSet<i64> = matching.iter().map(|o| o.order_id).collect();
        for record in self.ledger.open_orders(symbol).await? {
            let Some(broker_order_id) = record.broker_order_id else {
                continue;
            };
            if !snapshot_ids.contains(&broker_order_id)
                && self
                    .ledger
                    .update_status(broker_order_id, OrderStatus::Cancelled)
                    .await?
            {
                report.cancelled += 1;
            }
        }

        tracing::info!(
            symbol,
            seen = report.seen,
            cancelled = report.cancelled,
            skipped = report.skipped,
            orphans = report.orphans,
            tracked_before = previously_tracked,
            tracked_after = tracker.len(),
            "order sync complete"
        );

        Ok(report)
    }
}
