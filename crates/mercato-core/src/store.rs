//! # Storage Interfaces
//!
//! The seams between the ledger and whatever persists lots and audit records.
//!
//! ## Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LotStore ──begin()──► UnitOfWork (one atomic transaction)              │
//! │                          │                                              │
//! │                          ├── lots_for_product / lot      (reads)        │
//! │                          ├── write_quantity              (conditional)  │
//! │                          ├── insert_lot / delete_lot                    │
//! │                          ├── savepoint / rollback_to / release          │
//! │                          └── commit / rollback                          │
//! │                                                                         │
//! │  AuditSink ──record()──► append-only store, outside the unit           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conditional Writes
//! `write_quantity` succeeds only if the lot's stored version still equals
//! the version of the snapshot passed in; storage then bumps the version.
//! A mismatch is reported as [`WriteOutcome::VersionMismatch`], never as an
//! error, so the ledger can decide to retry.

use async_trait::async_trait;

use crate::error::StockResult;
use crate::types::{AuditRecord, StockLot};

/// Result of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { new_version: i64 },
    VersionMismatch,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Factory for atomic units of work over stock lots.
#[async_trait]
pub trait LotStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Opens a new transaction.
    async fn begin(&self) -> StockResult<Self::Unit>;
}

/// One open storage transaction.
///
/// Dropping a unit without committing discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lots of (product, shop) in FIFO order.
    async fn lots_for_product(&mut self, product_id: &str, shop_id: &str)
        -> StockResult<Vec<StockLot>>;

    async fn lot(&mut self, lot_id: &str) -> StockResult<Option<StockLot>>;

    /// Sets `quantity` on the lot if its version still equals `lot.version`.
    async fn write_quantity(&mut self, lot: &StockLot, quantity: i64) -> StockResult<WriteOutcome>;

    async fn insert_lot(&mut self, lot: &StockLot) -> StockResult<()>;

    /// Removes the lot if its version still equals `lot.version`.
    async fn delete_lot(&mut self, lot: &StockLot) -> StockResult<WriteOutcome>;

    async fn savepoint(&mut self) -> StockResult<()>;

    /// Undoes every write since the innermost open savepoint and closes it.
    async fn rollback_to_savepoint(&mut self) -> StockResult<()>;

    /// Closes the innermost savepoint, keeping its writes.
    async fn release_savepoint(&mut self) -> StockResult<()>;

    async fn commit(self) -> StockResult<()>;

    async fn rollback(self) -> StockResult<()>;
}

/// Destination for audit records. Failures here never undo stock changes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> StockResult<()>;
}
