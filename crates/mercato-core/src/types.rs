//! # Domain Types
//!
//! Core domain types used throughout the stock ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    StockLot     │   │      Sale       │   │   AuditRecord   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  lot_id         │       │
//! │  │  product/shop   │   │  shop_id        │   │  operation      │       │
//! │  │  quantity ≥ 0   │   │  status         │   │  old/new qty    │       │
//! │  │  version (OCC)  │   │  lines          │   │  old/new version│       │
//! │  │  expiration     │   │  payments       │   │  recorded_at    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     NewLot      │   │   SaleStatus    │   │  OperationType  │       │
//! │  │  receipt input  │   │  Draft          │   │  Insert         │       │
//! │  └─────────────────┘   │  Completed      │   │  Update         │       │
//! │                        └─────────────────┘   │  Delete         │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Source of Truth
//! Available stock for (product, shop) is the sum of `quantity` over its
//! lots. There is no cached counter anywhere.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StockError, StockResult};
use crate::money::Money;
use crate::validation::{
    validate_line_count, validate_line_quantity, validate_payment_amount, validate_price_cents,
};

// =============================================================================
// Stock Lot
// =============================================================================

/// One delivered batch of one product at one shop.
///
/// `quantity` is the only field that changes under normal operation.
/// `version` is the optimistic-concurrency token; storage increments it on
/// every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockLot {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub product_id: String,

    /// Owning shop. A lot belongs to exactly one shop.
    pub shop_id: String,

    /// Units left in this lot. Never negative.
    pub quantity: i64,

    /// OCC token, compared on every conditional write.
    pub version: i64,

    /// Lots without an expiration are consumed last.
    pub expiration_date: Option<NaiveDate>,

    pub purchase_date: NaiveDate,

    /// Purchase price per unit in cents.
    pub purchase_price_cents: i64,

    pub supplier_id: Option<String>,

    pub last_modified: DateTime<Utc>,
}

impl StockLot {
    /// Builds the lot a receipt will insert (version 0, fresh id).
    pub fn from_new(new: NewLot) -> Self {
        StockLot {
            id: Uuid::new_v4().to_string(),
            product_id: new.product_id,
            shop_id: new.shop_id,
            quantity: new.quantity,
            version: 0,
            expiration_date: new.expiration_date,
            purchase_date: new.purchase_date,
            purchase_price_cents: new.purchase_price_cents,
            supplier_id: new.supplier_id,
            last_modified: Utc::now(),
        }
    }

    /// Snapshot of this lot after a successful quantity write.
    pub fn with_quantity(&self, quantity: i64, version: i64) -> Self {
        StockLot {
            quantity,
            version,
            last_modified: Utc::now(),
            ..self.clone()
        }
    }
}

/// Sums `quantity` across lots.
pub fn total_quantity(lots: &[StockLot]) -> i64 {
    lots.iter().map(|lot| lot.quantity).sum()
}

// =============================================================================
// New Lot (stock receipt input)
// =============================================================================

/// Input for receiving a brand-new lot.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use mercato_core::NewLot;
///
/// let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
/// let lot = NewLot::new("yogurt", "shop-1", 24, today)
///     .expiring(today + chrono::Days::new(14))
///     .priced_at(45)
///     .supplied_by("dairy-co");
/// assert_eq!(lot.quantity, 24);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub product_id: String,
    pub shop_id: String,
    pub quantity: i64,
    pub expiration_date: Option<NaiveDate>,
    pub purchase_date: NaiveDate,
    pub purchase_price_cents: i64,
    pub supplier_id: Option<String>,
}

impl NewLot {
    pub fn new(
        product_id: impl Into<String>,
        shop_id: impl Into<String>,
        quantity: i64,
        purchase_date: NaiveDate,
    ) -> Self {
        NewLot {
            product_id: product_id.into(),
            shop_id: shop_id.into(),
            quantity,
            expiration_date: None,
            purchase_date,
            purchase_price_cents: 0,
            supplier_id: None,
        }
    }

    pub fn expiring(mut self, date: NaiveDate) -> Self {
        self.expiration_date = Some(date);
        self
    }

    pub fn priced_at(mut self, cents: i64) -> Self {
        self.purchase_price_cents = cents;
        self
    }

    pub fn supplied_by(mut self, supplier_id: impl Into<String>) -> Self {
        self.supplier_id = Some(supplier_id.into());
        self
    }
}

// =============================================================================
// Lot Changes & Reservations
// =============================================================================

/// One applied quantity change on a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotChange {
    pub lot_id: String,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub new_version: i64,
}

impl LotChange {
    /// Units moved by this change (positive for decreases).
    #[inline]
    pub fn taken(&self) -> i64 {
        self.old_quantity - self.new_quantity
    }
}

/// Units held out of one lot by a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotHold {
    pub lot_id: String,
    pub quantity: i64,
}

/// Stock taken out of lots ahead of a sale, releasable lot by lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub product_id: String,
    pub shop_id: String,
    pub quantity: i64,
    pub holds: Vec<LotHold>,
}

impl Reservation {
    /// Builds a reservation from the changes of a successful decrease.
    pub fn from_changes(
        product_id: impl Into<String>,
        shop_id: impl Into<String>,
        changes: &[LotChange],
    ) -> Self {
        let holds: Vec<LotHold> = changes
            .iter()
            .map(|c| LotHold {
                lot_id: c.lot_id.clone(),
                quantity: c.taken(),
            })
            .collect();

        Reservation {
            product_id: product_id.into(),
            shop_id: shop_id.into(),
            quantity: holds.iter().map(|h| h.quantity).sum(),
            holds,
        }
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Kind of lot mutation an audit record documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, append-only record of one lot mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditRecord {
    pub id: String,
    pub lot_id: String,
    pub product_id: String,
    pub shop_id: String,
    pub operation: OperationType,
    pub old_quantity: Option<i64>,
    pub new_quantity: Option<i64>,
    pub old_version: Option<i64>,
    pub new_version: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Captures a mutation from before/after snapshots.
    ///
    /// `old` is `None` for inserts. For deletes, `new` is the lot as it was
    /// removed and the record carries no new values.
    pub fn capture(old: Option<&StockLot>, new: &StockLot, operation: OperationType) -> Self {
        let keeps_new = operation != OperationType::Delete;

        AuditRecord {
            id: Uuid::new_v4().to_string(),
            lot_id: new.id.clone(),
            product_id: new.product_id.clone(),
            shop_id: new.shop_id.clone(),
            operation,
            old_quantity: old.map(|lot| lot.quantity),
            new_quantity: keeps_new.then_some(new.quantity),
            old_version: old.map(|lot| lot.version),
            new_version: keeps_new.then_some(new.version),
            recorded_at: Utc::now(),
        }
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Items can still be added, removed or adjusted.
    #[default]
    Draft,
    /// Payment recorded and stock decremented. Immutable.
    Completed,
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    ExternalCard,
}

// =============================================================================
// Sale Line & Payment
// =============================================================================

/// A line item on a sale. The unit price is frozen when the line is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleLine {
    pub id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl SaleLine {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents) * self.quantity
    }
}

/// A completed payment towards a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub sale_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(sale_id: impl Into<String>, method: PaymentMethod, amount_cents: i64) -> Self {
        Payment {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.into(),
            method,
            amount_cents,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

/// An in-progress or completed transaction for one shop.
///
/// ## Lifecycle
/// ```text
/// new() ──► add_item / remove_item / set_quantity ──► record_payment()
///  (empty)        (only while no payment exists)        (finalized, immutable)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub shop_id: String,
    pub status: SaleStatus,
    pub total_cents: i64,
    /// Paid now, collected later. Stock still leaves the lots at finalization.
    pub is_deferred: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lines: Vec<SaleLine>,
    pub payments: Vec<Payment>,
}

impl Sale {
    /// Creates an empty draft sale.
    pub fn new(shop_id: impl Into<String>, is_deferred: bool) -> Self {
        let now = Utc::now();
        Sale {
            id: Uuid::new_v4().to_string(),
            shop_id: shop_id.into(),
            status: SaleStatus::Draft,
            total_cents: 0,
            is_deferred,
            created_at: now,
            updated_at: now,
            completed_at: None,
            lines: Vec::new(),
            payments: Vec::new(),
        }
    }

    /// A sale is finalized once any payment is recorded.
    pub fn is_finalized(&self) -> bool {
        self.status == SaleStatus::Completed || !self.payments.is_empty()
    }

    fn ensure_open(&self) -> StockResult<()> {
        if self.is_finalized() {
            return Err(StockError::SaleFinalized(self.id.clone()));
        }
        Ok(())
    }

    pub fn line(&self, product_id: &str) -> Option<&SaleLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Adds units of a product. A product already on the sale keeps its
    /// original price and gets the quantity added to its line.
    pub fn add_item(
        &mut self,
        product_id: &str,
        quantity: i64,
        unit_price_cents: i64,
    ) -> StockResult<()> {
        self.ensure_open()?;
        validate_line_quantity(quantity)?;
        validate_price_cents(unit_price_cents)?;

        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            let merged = line.quantity + quantity;
            validate_line_quantity(merged)?;
            line.quantity = merged;
        } else {
            validate_line_count(self.lines.len())?;
            self.lines.push(SaleLine {
                id: Uuid::new_v4().to_string(),
                product_id: product_id.to_string(),
                quantity,
                unit_price_cents,
            });
        }

        self.recalculate_total();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> StockResult<()> {
        self.ensure_open()?;

        let position = self
            .lines
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or_else(|| self.line_not_found(product_id))?;
        self.lines.remove(position);

        self.recalculate_total();
        Ok(())
    }

    pub fn set_quantity(&mut self, product_id: &str, quantity: i64) -> StockResult<()> {
        self.ensure_open()?;
        validate_line_quantity(quantity)?;

        let missing = self.line_not_found(product_id);
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(missing)?;
        line.quantity = quantity;

        self.recalculate_total();
        Ok(())
    }

    /// Records the payment that finalizes the sale.
    pub fn record_payment(&mut self, payment: Payment) -> StockResult<()> {
        self.ensure_open()?;
        if self.lines.is_empty() {
            return Err(StockError::EmptySale(self.id.clone()));
        }
        validate_payment_amount(payment.amount_cents)?;
        if payment.sale_id != self.id {
            return Err(StockError::InvalidPayment {
                reason: format!("payment belongs to sale {}", payment.sale_id),
            });
        }

        self.status = SaleStatus::Completed;
        self.completed_at = Some(payment.created_at);
        self.updated_at = payment.created_at;
        self.payments.push(payment);
        Ok(())
    }

    /// Requested units per product, in line order.
    pub fn quantities_by_product(&self) -> Vec<(String, i64)> {
        let mut demand: Vec<(String, i64)> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match demand.iter_mut().find(|(product, _)| *product == line.product_id) {
                Some((_, qty)) => *qty += line.quantity,
                None => demand.push((line.product_id.clone(), line.quantity)),
            }
        }
        demand
    }

    fn recalculate_total(&mut self) {
        self.total_cents = self.lines.iter().map(SaleLine::line_total).sum::<Money>().cents();
    }

    fn line_not_found(&self, product_id: &str) -> StockError {
        StockError::LineNotFound {
            sale_id: self.id.clone(),
            product_id: product_id.to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
