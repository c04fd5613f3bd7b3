//! # Stock Ledger
//!
//! FIFO-by-expiration stock mutations with optimistic concurrency and a
//! bounded retry loop.
//!
//! ## One Attempt
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. read all lots of (product, shop)     fresh on every attempt        │
//! │  2. plan: earliest expiry first          InsufficientStock → stop      │
//! │  3. conditional write per planned lot    VersionMismatch  → Conflict   │
//! │  4. buffer one audit record per write                                  │
//! │                                                                         │
//! │  Any failure undoes every write of the attempt (transaction rollback   │
//! │  or savepoint rollback) and drops its buffered audit records.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Loop
//! ```text
//! attempt 1 ──Conflict──► sleep 100ms ──► attempt 2 ──Conflict──► sleep 200ms
//!    ──► attempt 3 ──Conflict──► Err(Conflict { attempts: 3 })
//!
//! InsufficientStock / LotNotFound / UnknownLot / Storage → returned at once
//! ```
//!
//! ## Transactions
//! Operations without a `_in` suffix own their transaction: the retry loop
//! wraps begin → attempt → commit, so conflicts detected at commit time are
//! retried too. The `_in` variants run inside a caller's
//! [`StockTransaction`]; each attempt gets its own savepoint so a retry
//! never discards the caller's earlier work.
//!
//! Audit records reach the [`AuditSink`] only after the outer commit. A
//! failing sink is logged and never undoes the committed stock change.

use std::sync::Arc;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, error, info, warn};

use mercato_core::fifo::plan_decrement;
use mercato_core::validation::{
    validate_id, validate_price_cents, validate_requested_quantity, validate_stock_quantity,
};
use mercato_core::{
    AuditRecord, AuditSink, LotChange, LotHold, LotStore, NewLot, OperationType, Reservation,
    RetryPolicy, Sale, StockError, StockLot, StockResult, UnitOfWork, ValidationError,
    WriteOutcome,
};

// =============================================================================
// Stock Transaction
// =============================================================================

/// An open unit of work plus the audit records it will emit on commit.
#[derive(Debug)]
pub struct StockTransaction<U> {
    unit: U,
    pending: Vec<AuditRecord>,
    /// Audit buffer length at each open scope.
    marks: Vec<usize>,
}

impl<U: UnitOfWork> StockTransaction<U> {
    fn new(unit: U) -> Self {
        StockTransaction {
            unit,
            pending: Vec::new(),
            marks: Vec::new(),
        }
    }

    /// The underlying storage unit, for writing related rows atomically.
    pub fn unit_mut(&mut self) -> &mut U {
        &mut self.unit
    }

    /// Audit records that will be emitted if this transaction commits.
    pub fn pending_audit(&self) -> &[AuditRecord] {
        &self.pending
    }

    async fn enter_scope(&mut self) -> StockResult<()> {
        self.unit.savepoint().await?;
        self.marks.push(self.pending.len());
        Ok(())
    }

    async fn undo_scope(&mut self) -> StockResult<()> {
        self.unit.rollback_to_savepoint().await?;
        if let Some(mark) = self.marks.pop() {
            self.pending.truncate(mark);
        }
        Ok(())
    }

    async fn exit_scope(&mut self) -> StockResult<()> {
        self.unit.release_savepoint().await?;
        self.marks.pop();
        Ok(())
    }

    async fn write(&mut self, lot: &StockLot, quantity: i64) -> StockResult<WriteOutcome> {
        let outcome = self.unit.write_quantity(lot, quantity).await?;
        if let WriteOutcome::Written { new_version } = outcome {
            let after = lot.with_quantity(quantity, new_version);
            self.pending
                .push(AuditRecord::capture(Some(lot), &after, OperationType::Update));
        }
        Ok(outcome)
    }

    async fn insert(&mut self, lot: &StockLot) -> StockResult<()> {
        self.unit.insert_lot(lot).await?;
        self.pending
            .push(AuditRecord::capture(None, lot, OperationType::Insert));
        Ok(())
    }

    async fn delete(&mut self, lot: &StockLot) -> StockResult<WriteOutcome> {
        let outcome = self.unit.delete_lot(lot).await?;
        if outcome.is_written() {
            self.pending
                .push(AuditRecord::capture(Some(lot), lot, OperationType::Delete));
        }
        Ok(outcome)
    }
}

// =============================================================================
// Operations
// =============================================================================

/// What a single attempt does. Borrowed so retries reuse the same input.
#[derive(Debug, Clone, Copy)]
enum Op<'a> {
    Decrease {
        product_id: &'a str,
        shop_id: &'a str,
        quantity: i64,
    },
    DecreaseMany {
        shop_id: &'a str,
        demand: &'a [(String, i64)],
    },
    Increase {
        lot_id: &'a str,
        quantity: i64,
    },
    Release {
        holds: &'a [LotHold],
    },
    WriteOff {
        lot_id: &'a str,
    },
}

impl Op<'_> {
    fn name(&self) -> &'static str {
        match self {
            Op::Decrease { .. } => "decrease",
            Op::DecreaseMany { .. } => "decrease_for_sale",
            Op::Increase { .. } => "increase",
            Op::Release { .. } => "release",
            Op::WriteOff { .. } => "write_off",
        }
    }
}

async fn apply<U: UnitOfWork>(
    tx: &mut StockTransaction<U>,
    op: Op<'_>,
    attempt: u32,
) -> StockResult<Vec<LotChange>> {
    match op {
        Op::Decrease {
            product_id,
            shop_id,
            quantity,
        } => decrease(tx, product_id, shop_id, quantity, attempt).await,

        Op::DecreaseMany { shop_id, demand } => {
            let mut changes = Vec::new();
            for (product_id, quantity) in demand {
                changes.extend(decrease(tx, product_id, shop_id, *quantity, attempt).await?);
            }
            Ok(changes)
        }

        Op::Increase { lot_id, quantity } => {
            let lot = load_lot(tx, lot_id).await?;
            let change = write_change(tx, &lot, restocked(&lot, quantity)?, attempt).await?;
            Ok(vec![change])
        }

        Op::Release { holds } => {
            let mut changes = Vec::with_capacity(holds.len());
            for hold in holds {
                let lot = load_lot(tx, &hold.lot_id).await?;
                let quantity = restocked(&lot, hold.quantity)?;
                changes.push(write_change(tx, &lot, quantity, attempt).await?);
            }
            Ok(changes)
        }

        Op::WriteOff { lot_id } => {
            let lot = load_lot(tx, lot_id).await?;
            match tx.delete(&lot).await? {
                WriteOutcome::Written { .. } => Ok(vec![LotChange {
                    lot_id: lot.id.clone(),
                    old_quantity: lot.quantity,
                    new_quantity: 0,
                    new_version: lot.version,
                }]),
                WriteOutcome::VersionMismatch => Err(StockError::conflict(&lot.id, attempt)),
            }
        }
    }
}

async fn decrease<U: UnitOfWork>(
    tx: &mut StockTransaction<U>,
    product_id: &str,
    shop_id: &str,
    quantity: i64,
    attempt: u32,
) -> StockResult<Vec<LotChange>> {
    let lots = tx.unit.lots_for_product(product_id, shop_id).await?;
    let plan = plan_decrement(product_id, shop_id, &lots, quantity)?;

    let mut changes = Vec::with_capacity(plan.len());
    for allocation in &plan {
        let lot = lots
            .iter()
            .find(|l| l.id == allocation.lot_id)
            .ok_or_else(|| StockError::UnknownLot(allocation.lot_id.clone()))?;
        changes.push(write_change(tx, lot, allocation.new_quantity(), attempt).await?);
    }

    Ok(changes)
}

async fn load_lot<U: UnitOfWork>(tx: &mut StockTransaction<U>, lot_id: &str) -> StockResult<StockLot> {
    tx.unit
        .lot(lot_id)
        .await?
        .ok_or_else(|| StockError::UnknownLot(lot_id.to_string()))
}

async fn write_change<U: UnitOfWork>(
    tx: &mut StockTransaction<U>,
    lot: &StockLot,
    quantity: i64,
    attempt: u32,
) -> StockResult<LotChange> {
    match tx.write(lot, quantity).await? {
        WriteOutcome::Written { new_version } => {
            debug!(
                lot_id = %lot.id,
                old_quantity = lot.quantity,
                new_quantity = quantity,
                new_version,
                "Lot written"
            );
            Ok(LotChange {
                lot_id: lot.id.clone(),
                old_quantity: lot.quantity,
                new_quantity: quantity,
                new_version,
            })
        }
        WriteOutcome::VersionMismatch => {
            debug!(lot_id = %lot.id, read_version = lot.version, attempt, "Lot changed since read");
            Err(StockError::conflict(&lot.id, attempt))
        }
    }
}

/// Quantity of `lot` once `quantity` units go back into it.
fn restocked(lot: &StockLot, quantity: i64) -> StockResult<i64> {
    lot.quantity.checked_add(quantity).ok_or_else(|| {
        ValidationError::OutOfRange {
            field: "quantity".into(),
            min: 1,
            max: i64::MAX - lot.quantity,
        }
        .into()
    })
}

/// Wait schedule for one operation's retries.
fn schedule(policy: &RetryPolicy) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff {
        initial_interval: policy.initial_delay,
        max_interval: policy.max_delay,
        multiplier: f64::from(policy.multiplier),
        randomization_factor: 0.0,
        max_elapsed_time: None,
        ..Default::default()
    };
    backoff.reset();
    backoff
}

/// Final error once the attempt budget is spent.
fn exhausted(err: StockError, attempts: u32) -> StockError {
    match err {
        StockError::Conflict { lot_id, .. } => StockError::Conflict { lot_id, attempts },
        other => other,
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// The stock ledger. Holds no locks; correctness comes from the store's
/// version-checked writes.
#[derive(Clone)]
pub struct StockLedger<S> {
    store: S,
    audit: Arc<dyn AuditSink>,
    policy: RetryPolicy,
}

impl<S: LotStore> StockLedger<S> {
    /// Creates a ledger with the default retry policy (3 attempts,
    /// 100ms initial backoff, doubling).
    pub fn new(store: S, audit: Arc<dyn AuditSink>) -> Self {
        StockLedger {
            store,
            audit,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Unit of Work
    // =========================================================================

    pub async fn begin(&self) -> StockResult<StockTransaction<S::Unit>> {
        Ok(StockTransaction::new(self.store.begin().await?))
    }

    /// Commits the transaction, then flushes its audit records.
    pub async fn commit(&self, tx: StockTransaction<S::Unit>) -> StockResult<()> {
        let StockTransaction { unit, pending, .. } = tx;
        unit.commit().await?;
        info!(mutations = pending.len(), "Stock transaction committed");
        self.flush_audit(pending).await;
        Ok(())
    }

    /// Discards the transaction and its audit records.
    pub async fn rollback(&self, tx: StockTransaction<S::Unit>) -> StockResult<()> {
        let StockTransaction { unit, pending, .. } = tx;
        debug!(discarded = pending.len(), "Stock transaction rolled back");
        unit.rollback().await
    }

    async fn discard(&self, tx: StockTransaction<S::Unit>) {
        if let Err(err) = self.rollback(tx).await {
            warn!(error = %err, "Rollback failed");
        }
    }

    async fn flush_audit(&self, records: Vec<AuditRecord>) {
        for record in records {
            let lot_id = record.lot_id.clone();
            let operation = record.operation;
            if let Err(err) = self.audit.record(record).await {
                warn!(lot_id = %lot_id, %operation, error = %err, "Audit record dropped");
            }
        }
    }

    // =========================================================================
    // Retry Loops
    // =========================================================================

    /// Sleeps before the next attempt, or returns the error that ends the
    /// operation.
    async fn retry_after(
        &self,
        op: Op<'_>,
        err: StockError,
        attempt: u32,
        backoff: &mut ExponentialBackoff,
    ) -> StockResult<()> {
        if !err.is_retryable() {
            return Err(err);
        }

        let delay = if self.policy.allows_retry_after(attempt) {
            backoff.next_backoff()
        } else {
            None
        };

        match delay {
            Some(delay) => {
                warn!(
                    operation = op.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                error!(
                    operation = op.name(),
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                Err(exhausted(err, attempt))
            }
        }
    }

    /// Runs `op` in transactions of its own until it commits or fails for good.
    async fn run(&self, op: Op<'_>) -> StockResult<Vec<LotChange>> {
        let mut backoff = schedule(&self.policy);
        let mut attempt = 1;
        loop {
            let err = match self.run_once(op, attempt).await {
                Ok(changes) => return Ok(changes),
                Err(err) => err,
            };
            self.retry_after(op, err, attempt, &mut backoff).await?;
            attempt += 1;
        }
    }

    async fn run_once(&self, op: Op<'_>, attempt: u32) -> StockResult<Vec<LotChange>> {
        let mut tx = self.begin().await?;
        match apply(&mut tx, op, attempt).await {
            Ok(changes) => {
                self.commit(tx).await?;
                Ok(changes)
            }
            Err(err) => {
                self.discard(tx).await;
                Err(err)
            }
        }
    }

    /// Runs `op` inside the caller's transaction, one savepoint per attempt.
    async fn run_in(
        &self,
        tx: &mut StockTransaction<S::Unit>,
        op: Op<'_>,
    ) -> StockResult<Vec<LotChange>> {
        let mut backoff = schedule(&self.policy);
        let mut attempt = 1;
        loop {
            tx.enter_scope().await?;
            let err = match apply(tx, op, attempt).await {
                Ok(changes) => {
                    tx.exit_scope().await?;
                    return Ok(changes);
                }
                Err(err) => err,
            };
            tx.undo_scope().await?;
            self.retry_after(op, err, attempt, &mut backoff).await?;
            attempt += 1;
        }
    }

    // =========================================================================
    // Reads (advisory)
    // =========================================================================

    /// Sum of lot quantities for (product, shop).
    pub async fn get_total_quantity(&self, product_id: &str, shop_id: &str) -> StockResult<i64> {
        let mut unit = self.store.begin().await?;
        let result = unit.lots_for_product(product_id, shop_id).await;
        unit.rollback().await?;
        Ok(result?.iter().map(|l| l.quantity).sum())
    }

    /// Whether (product, shop) currently holds at least `requested` units.
    /// Zero is always available.
    ///
    /// Advisory only: nothing is reserved, and the answer can be stale by
    /// the time a decrease runs.
    pub async fn validate_availability(
        &self,
        product_id: &str,
        shop_id: &str,
        requested: i64,
    ) -> StockResult<bool> {
        validate_requested_quantity(requested)?;
        let available = self.get_total_quantity(product_id, shop_id).await?;
        Ok(available >= requested)
    }

    // =========================================================================
    // Decreases
    // =========================================================================

    /// Takes `quantity` units out of the lots of (product, shop), earliest
    /// expiration first, in a transaction of its own.
    pub async fn decrease_for_product(
        &self,
        product_id: &str,
        shop_id: &str,
        quantity: i64,
    ) -> StockResult<Vec<LotChange>> {
        validate_stock_quantity(quantity)?;

        let changes = self
            .run(Op::Decrease {
                product_id,
                shop_id,
                quantity,
            })
            .await?;

        info!(product_id, shop_id, quantity, lots = changes.len(), "Stock decreased");
        Ok(changes)
    }

    /// Same as [`Self::decrease_for_product`], inside the caller's transaction.
    pub async fn decrease_for_product_in(
        &self,
        tx: &mut StockTransaction<S::Unit>,
        product_id: &str,
        shop_id: &str,
        quantity: i64,
    ) -> StockResult<Vec<LotChange>> {
        validate_stock_quantity(quantity)?;

        self.run_in(
            tx,
            Op::Decrease {
                product_id,
                shop_id,
                quantity,
            },
        )
        .await
    }

    /// Decreases stock for every line of a sale, all or nothing.
    ///
    /// Lines are aggregated per product first. A conflict on any product
    /// retries the whole sale on fresh state.
    pub async fn decrease_for_sale(&self, sale: &Sale) -> StockResult<Vec<LotChange>> {
        let demand = sale_demand(sale)?;

        let changes = self
            .run(Op::DecreaseMany {
                shop_id: &sale.shop_id,
                demand: &demand,
            })
            .await?;

        info!(sale_id = %sale.id, products = demand.len(), lots = changes.len(), "Sale stock decreased");
        Ok(changes)
    }

    /// Decreases stock for a sale inside the caller's transaction. Each
    /// product retries in its own savepoint.
    pub async fn decrease_for_sale_in(
        &self,
        tx: &mut StockTransaction<S::Unit>,
        sale: &Sale,
    ) -> StockResult<Vec<LotChange>> {
        let demand = sale_demand(sale)?;

        let mut changes = Vec::new();
        for (product_id, quantity) in &demand {
            let applied = self
                .run_in(
                    tx,
                    Op::Decrease {
                        product_id,
                        shop_id: &sale.shop_id,
                        quantity: *quantity,
                    },
                )
                .await?;
            changes.extend(applied);
        }

        Ok(changes)
    }

    // =========================================================================
    // Increases & Reservations
    // =========================================================================

    /// Adds `quantity` units to one existing lot.
    pub async fn increase(&self, lot_id: &str, quantity: i64) -> StockResult<LotChange> {
        validate_stock_quantity(quantity)?;

        let change = self
            .run(Op::Increase { lot_id, quantity })
            .await?
            .pop()
            .ok_or_else(|| StockError::UnknownLot(lot_id.to_string()))?;

        info!(lot_id, quantity, new_quantity = change.new_quantity, "Stock increased");
        Ok(change)
    }

    /// Takes stock out FIFO like a decrease and remembers which lots gave
    /// how much.
    pub async fn reserve(
        &self,
        product_id: &str,
        shop_id: &str,
        quantity: i64,
    ) -> StockResult<Reservation> {
        validate_stock_quantity(quantity)?;

        let changes = self
            .run(Op::Decrease {
                product_id,
                shop_id,
                quantity,
            })
            .await?;

        let reservation = Reservation::from_changes(product_id, shop_id, &changes);
        info!(product_id, shop_id, quantity, lots = reservation.holds.len(), "Stock reserved");
        Ok(reservation)
    }

    /// Gives every held unit back to the lot it came from, all or nothing.
    pub async fn release(&self, reservation: &Reservation) -> StockResult<Vec<LotChange>> {
        let changes = self
            .run(Op::Release {
                holds: &reservation.holds,
            })
            .await?;

        info!(
            product_id = %reservation.product_id,
            shop_id = %reservation.shop_id,
            quantity = reservation.quantity,
            "Reservation released"
        );
        Ok(changes)
    }

    // =========================================================================
    // Lot Lifecycle
    // =========================================================================

    /// Receives a brand-new lot (version 0).
    pub async fn receive_lot(&self, new: NewLot) -> StockResult<StockLot> {
        validate_id("product_id", &new.product_id)?;
        validate_id("shop_id", &new.shop_id)?;
        if new.quantity < 0 {
            return Err(ValidationError::Negative {
                field: "quantity".to_string(),
            }
            .into());
        }
        validate_price_cents(new.purchase_price_cents)?;

        let lot = StockLot::from_new(new);

        let mut tx = self.begin().await?;
        if let Err(err) = tx.insert(&lot).await {
            self.discard(tx).await;
            return Err(err);
        }
        self.commit(tx).await?;

        info!(
            lot_id = %lot.id,
            product_id = %lot.product_id,
            shop_id = %lot.shop_id,
            quantity = lot.quantity,
            "Lot received"
        );
        Ok(lot)
    }

    /// Removes a lot entirely (expired or damaged stock).
    pub async fn write_off_lot(&self, lot_id: &str) -> StockResult<LotChange> {
        let change = self
            .run(Op::WriteOff { lot_id })
            .await?
            .pop()
            .ok_or_else(|| StockError::UnknownLot(lot_id.to_string()))?;

        info!(lot_id, quantity = change.old_quantity, "Lot written off");
        Ok(change)
    }
}

/// Per-product demand of a sale, validated.
fn sale_demand(sale: &Sale) -> StockResult<Vec<(String, i64)>> {
    if sale.lines.is_empty() {
        return Err(StockError::EmptySale(sale.id.clone()));
    }

    let demand = sale.quantities_by_product();
    for (_, quantity) in &demand {
        validate_stock_quantity(*quantity)?;
    }
    Ok(demand)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::memory::InMemoryLotStore;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn lot(product: &str, qty: i64, expires: Option<u32>) -> StockLot {
        let mut new = NewLot::new(product, "shop-1", qty, day(1));
        if let Some(d) = expires {
            new = new.expiring(day(d));
        }
        StockLot::from_new(new)
    }

    fn ledger_with(
        lots: Vec<StockLot>,
    ) -> (StockLedger<InMemoryLotStore>, InMemoryLotStore, MemoryAuditSink) {
        let store = InMemoryLotStore::with_lots(lots);
        let audit = MemoryAuditSink::new();
        let ledger = StockLedger::new(store.clone(), Arc::new(audit.clone()));
        (ledger, store, audit)
    }

    #[tokio::test]
    async fn test_decrease_spans_lots_fifo() {
        let a = lot("milk", 10, Some(1));
        let b = lot("milk", 10, Some(5));
        let (ledger, store, audit) = ledger_with(vec![b.clone(), a.clone()]);

        let changes = ledger.decrease_for_product("milk", "shop-1", 12).await.unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(store.lot(&a.id).unwrap().quantity, 0);
        assert_eq!(store.lot(&b.id).unwrap().quantity, 8);
        assert_eq!(store.commits(), 1);

        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.operation == OperationType::Update));
        assert_eq!(records[0].lot_id, a.id);
        assert_eq!(records[0].old_quantity, Some(10));
        assert_eq!(records[0].new_quantity, Some(0));
        assert_eq!(records[0].old_version, Some(0));
        assert_eq!(records[0].new_version, Some(1));
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let a = lot("milk", 3, Some(1));
        let b = lot("milk", 2, Some(2));
        let (ledger, store, audit) = ledger_with(vec![a.clone(), b.clone()]);

        let err = ledger.decrease_for_product("milk", "shop-1", 6).await.unwrap_err();

        assert!(matches!(
            err,
            StockError::InsufficientStock {
                requested: 6,
                available: 5,
                ..
            }
        ));
        assert_eq!(err.missing(), Some(1));
        assert_eq!(store.lot(&a.id).unwrap(), a);
        assert_eq!(store.lot(&b.id).unwrap(), b);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_no_lots_is_lot_not_found() {
        let (ledger, _, _) = ledger_with(vec![]);

        let err = ledger.decrease_for_product("milk", "shop-1", 1).await.unwrap_err();
        assert!(matches!(err, StockError::LotNotFound { .. }));
        assert!(err.is_insufficient());
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_rejected() {
        let (ledger, store, _) = ledger_with(vec![lot("milk", 5, None)]);

        for qty in [0, -4] {
            let err = ledger.decrease_for_product("milk", "shop-1", qty).await.unwrap_err();
            assert!(matches!(err, StockError::Validation(_)));
        }
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_availability_is_advisory_read() {
        let (ledger, store, _) = ledger_with(vec![lot("milk", 4, Some(1)), lot("milk", 3, None)]);

        assert_eq!(ledger.get_total_quantity("milk", "shop-1").await.unwrap(), 7);
        assert_eq!(ledger.get_total_quantity("milk", "shop-9").await.unwrap(), 0);
        assert!(ledger.validate_availability("milk", "shop-1", 7).await.unwrap());
        assert!(!ledger.validate_availability("milk", "shop-1", 8).await.unwrap());
        assert!(ledger.validate_availability("milk", "shop-1", 0).await.unwrap());
        assert!(ledger.validate_availability("milk", "shop-9", 0).await.unwrap());
        assert!(matches!(
            ledger.validate_availability("milk", "shop-1", -1).await,
            Err(StockError::Validation(ValidationError::Negative { .. }))
        ));
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_increase_known_and_unknown_lot() {
        let a = lot("milk", 4, Some(1));
        let (ledger, store, audit) = ledger_with(vec![a.clone()]);

        let change = ledger.increase(&a.id, 6).await.unwrap();
        assert_eq!(change.new_quantity, 10);
        assert_eq!(store.lot(&a.id).unwrap().version, 1);
        assert_eq!(audit.count(OperationType::Update), 1);

        let err = ledger.increase("nope", 1).await.unwrap_err();
        assert_eq!(err, StockError::UnknownLot("nope".into()));
    }

    #[tokio::test]
    async fn test_increase_past_i64_max_is_rejected() {
        let a = lot("milk", 5, None);
        let (ledger, store, audit) = ledger_with(vec![a.clone()]);

        let err = ledger.increase(&a.id, i64::MAX).await.unwrap_err();

        assert!(matches!(
            err,
            StockError::Validation(ValidationError::OutOfRange { max, .. }) if max == i64::MAX - 5
        ));
        assert_eq!(store.lot(&a.id).unwrap(), a);
        assert_eq!(store.commits(), 0);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_schedule_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };
        let mut backoff = schedule(&policy);

        let waits: Vec<u128> = (0..6)
            .filter_map(|_| backoff.next_backoff())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(waits, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_immediate_schedule_never_waits() {
        let mut backoff = schedule(&RetryPolicy::immediate(5));
        for _ in 0..4 {
            assert_eq!(backoff.next_backoff().map(|d| d.as_millis()), Some(0));
        }
    }

    #[tokio::test]
    async fn test_decrease_for_sale_aggregates_lines() {
        let milk = lot("milk", 5, Some(1));
        let bread = lot("bread", 5, Some(1));
        let (ledger, store, _) = ledger_with(vec![milk.clone(), bread.clone()]);

        let mut sale = Sale::new("shop-1", false);
        sale.add_item("milk", 2, 100).unwrap();
        sale.add_item("bread", 1, 250).unwrap();
        sale.add_item("milk", 1, 100).unwrap();

        ledger.decrease_for_sale(&sale).await.unwrap();
        assert_eq!(store.lot(&milk.id).unwrap().quantity, 2);
        assert_eq!(store.lot(&bread.id).unwrap().quantity, 4);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_failed_sale_line_rolls_back_earlier_lines() {
        let milk = lot("milk", 5, Some(1));
        let bread = lot("bread", 1, Some(1));
        let (ledger, store, audit) = ledger_with(vec![milk.clone(), bread.clone()]);

        let mut sale = Sale::new("shop-1", false);
        sale.add_item("milk", 2, 100).unwrap();
        sale.add_item("bread", 3, 250).unwrap();

        let err = ledger.decrease_for_sale(&sale).await.unwrap_err();
        assert!(err.is_insufficient());
        assert_eq!(store.lot(&milk.id).unwrap(), milk);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_empty_sale_is_rejected() {
        let (ledger, _, _) = ledger_with(vec![]);
        let sale = Sale::new("shop-1", false);

        let err = ledger.decrease_for_sale(&sale).await.unwrap_err();
        assert!(matches!(err, StockError::EmptySale(_)));
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_lots() {
        let a = lot("milk", 3, Some(1));
        let b = lot("milk", 10, Some(4));
        let (ledger, store, _) = ledger_with(vec![a.clone(), b.clone()]);

        let reservation = ledger.reserve("milk", "shop-1", 5).await.unwrap();
        assert_eq!(reservation.quantity, 5);
        assert_eq!(reservation.holds.len(), 2);
        assert_eq!(reservation.holds[0].quantity, 3);
        assert_eq!(reservation.holds[1].quantity, 2);
        assert_eq!(store.total_quantity("milk", "shop-1"), 8);

        ledger.release(&reservation).await.unwrap();
        assert_eq!(store.lot(&a.id).unwrap().quantity, 3);
        assert_eq!(store.lot(&b.id).unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_receive_and_write_off_are_audited() {
        let (ledger, store, audit) = ledger_with(vec![]);

        let received = ledger
            .receive_lot(NewLot::new("milk", "shop-1", 12, day(1)).expiring(day(9)))
            .await
            .unwrap();
        assert_eq!(received.version, 0);
        assert_eq!(store.total_quantity("milk", "shop-1"), 12);

        let change = ledger.write_off_lot(&received.id).await.unwrap();
        assert_eq!(change.old_quantity, 12);
        assert!(store.lot(&received.id).is_none());

        let history = audit.records_for_lot(&received.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, OperationType::Insert);
        assert_eq!(history[0].old_quantity, None);
        assert_eq!(history[1].operation, OperationType::Delete);
        assert_eq!(history[1].new_quantity, None);

        let err = ledger.write_off_lot(&received.id).await.unwrap_err();
        assert!(matches!(err, StockError::UnknownLot(_)));
    }

    #[tokio::test]
    async fn test_receive_rejects_negative_quantity() {
        let (ledger, _, _) = ledger_with(vec![]);

        let err = ledger
            .receive_lot(NewLot::new("milk", "shop-1", -1, day(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));
    }

    #[tokio::test]
    async fn test_audit_failure_keeps_stock_change() {
        let a = lot("milk", 10, Some(1));
        let (ledger, store, audit) = ledger_with(vec![a.clone()]);
        audit.set_failing(true);

        ledger.decrease_for_product("milk", "shop-1", 4).await.unwrap();

        assert_eq!(store.lot(&a.id).unwrap().quantity, 6);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_emits_no_audit() {
        let a = lot("milk", 10, Some(1));
        let (ledger, store, audit) = ledger_with(vec![a.clone()]);

        let mut tx = ledger.begin().await.unwrap();
        ledger
            .decrease_for_product_in(&mut tx, "milk", "shop-1", 4)
            .await
            .unwrap();
        assert_eq!(tx.pending_audit().len(), 1);
        ledger.rollback(tx).await.unwrap();

        assert_eq!(store.lot(&a.id).unwrap().quantity, 10);
        assert!(audit.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_inside_transaction_keeps_earlier_work() {
        let milk = lot("milk", 5, Some(1));
        let bread = lot("bread", 5, Some(1));
        let (ledger, store, audit) = ledger_with(vec![milk.clone(), bread.clone()]);
        store.fail_next_writes(&bread.id, 1);

        let mut tx = ledger.begin().await.unwrap();
        ledger
            .decrease_for_product_in(&mut tx, "milk", "shop-1", 2)
            .await
            .unwrap();
        ledger
            .decrease_for_product_in(&mut tx, "bread", "shop-1", 3)
            .await
            .unwrap();
        // One record per lot: the failed bread attempt left nothing behind
        assert_eq!(tx.pending_audit().len(), 2);
        ledger.commit(tx).await.unwrap();

        assert_eq!(store.lot(&milk.id).unwrap().quantity, 3);
        assert_eq!(store.lot(&bread.id).unwrap().quantity, 2);
        assert_eq!(store.conflicts_observed(), 1);
        assert_eq!(audit.len(), 2);
    }
}
