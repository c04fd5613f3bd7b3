//! # FIFO Allocation
//!
//! Decides which lots a decrease draws from, and how much from each.
//!
//! ## Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  expiration_date ASC   (earliest expiring sold first)                   │
//! │  no expiration         (always after every dated lot)                   │
//! │  purchase_date ASC     (tie-break: older delivery first)                │
//! │  id ASC                (tie-break: deterministic)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Planning
//! ```text
//!  lots (sorted)    A:10 (day 1)    B:10 (day 5)    C:7 (none)
//!  request 12       take 10 ──────► take 2          untouched
//! ```
//!
//! A plan is all-or-nothing: if the lots cannot cover the request, no
//! allocation is produced and storage is never touched.

use std::cmp::Ordering;

use crate::error::{StockError, StockResult};
use crate::types::{total_quantity, StockLot};

/// Units to take from one lot, with the version the lot was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub lot_id: String,
    /// Version observed at read time. The write is conditional on it.
    pub expected_version: i64,
    pub old_quantity: i64,
    pub take: i64,
}

impl Allocation {
    #[inline]
    pub fn new_quantity(&self) -> i64 {
        self.old_quantity - self.take
    }
}

/// FIFO-by-expiration comparison between two lots.
pub fn fifo_order(a: &StockLot, b: &StockLot) -> Ordering {
    let by_expiry = match (a.expiration_date, b.expiration_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_expiry
        .then_with(|| a.purchase_date.cmp(&b.purchase_date))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts lots in consumption order.
pub fn sort_fifo(lots: &mut [StockLot]) {
    lots.sort_by(fifo_order);
}

/// Plans a decrease of `quantity` units across `lots`.
///
/// Lots may arrive in any order; the plan follows [`fifo_order`]. Lots
/// already at zero are skipped. Returns `LotNotFound` when there are no
/// lots and `InsufficientStock` when their total falls short.
pub fn plan_decrement(
    product_id: &str,
    shop_id: &str,
    lots: &[StockLot],
    quantity: i64,
) -> StockResult<Vec<Allocation>> {
    if lots.is_empty() {
        return Err(StockError::LotNotFound {
            product_id: product_id.to_string(),
            shop_id: shop_id.to_string(),
        });
    }

    let available = total_quantity(lots);
    if available < quantity {
        return Err(StockError::InsufficientStock {
            product_id: product_id.to_string(),
            shop_id: shop_id.to_string(),
            requested: quantity,
            available,
        });
    }

    let mut ordered: Vec<&StockLot> = lots.iter().collect();
    ordered.sort_by(|a, b| fifo_order(a, b));

    let mut remaining = quantity;
    let mut plan = Vec::new();

    for lot in ordered {
        if remaining == 0 {
            break;
        }
        if lot.quantity == 0 {
            continue;
        }

        let take = remaining.min(lot.quantity);
        plan.push(Allocation {
            lot_id: lot.id.clone(),
            expected_version: lot.version,
            old_quantity: lot.quantity,
            take,
        });
        remaining -= take;
    }

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================
