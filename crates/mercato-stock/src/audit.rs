//! # In-Process Audit Sinks
//!
//! [`MemoryAuditSink`] keeps records in a vector. It pairs with
//! [`crate::memory::InMemoryLotStore`] for embedded use and tests; the
//! SQLite sink lives in `mercato-db`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::trace;

use mercato_core::{AuditRecord, AuditSink, OperationType, StockError, StockResult};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<AuditRecord>,
    failing: bool,
}

/// Audit sink that appends to a shared in-memory log.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `record` call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// All records, in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().records.clone()
    }

    pub fn records_for_lot(&self, lot_id: &str) -> Vec<AuditRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.lot_id == lot_id)
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: OperationType) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> StockResult<()> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(StockError::storage("audit log unavailable"));
        }
        trace!(lot_id = %record.lot_id, operation = %record.operation, "audit appended");
        inner.records.push(record);
        Ok(())
    }
}
