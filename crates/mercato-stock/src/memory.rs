//! # In-Memory Lot Store
//!
//! A [`LotStore`] that keeps committed lots in a shared map and stages each
//! unit's writes privately until commit.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  unit.write_quantity(lot_as_read, qty)                                 │
//! │       │                                                                 │
//! │       ├── injected failure pending?      → VersionMismatch             │
//! │       ├── visible version ≠ read version → VersionMismatch             │
//! │       └── stage new snapshot (version + 1)                             │
//! │                                                                         │
//! │  unit.commit()                                                         │
//! │       ├── any staged lot whose committed version moved → Conflict      │
//! │       └── apply every staged lot at once                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads yield to the scheduler once, so concurrent callers on a single
//! thread genuinely interleave between read and write.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use mercato_core::fifo::sort_fifo;
use mercato_core::{LotStore, StockError, StockLot, StockResult, UnitOfWork, WriteOutcome};

#[derive(Debug, Default)]
struct State {
    lots: BTreeMap<String, StockLot>,
    /// Lot id → number of upcoming writes to reject.
    injected: HashMap<String, u32>,
    conflicts: u64,
    commits: u64,
}

/// Shared, cloneable in-memory lot storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLotStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `lots` (committed as given).
    pub fn with_lots(lots: impl IntoIterator<Item = StockLot>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for lot in lots {
                state.lots.insert(lot.id.clone(), lot);
            }
        }
        store
    }

    /// Committed snapshot of one lot.
    pub fn lot(&self, lot_id: &str) -> Option<StockLot> {
        self.lock().lots.get(lot_id).cloned()
    }

    /// Committed lots of (product, shop) in FIFO order.
    pub fn lots_for(&self, product_id: &str, shop_id: &str) -> Vec<StockLot> {
        let mut lots: Vec<StockLot> = self
            .lock()
            .lots
            .values()
            .filter(|l| l.product_id == product_id && l.shop_id == shop_id)
            .cloned()
            .collect();
        sort_fifo(&mut lots);
        lots
    }

    pub fn total_quantity(&self, product_id: &str, shop_id: &str) -> i64 {
        self.lots_for(product_id, shop_id)
            .iter()
            .map(|l| l.quantity)
            .sum()
    }

    /// Rejects the next `count` writes to `lot_id` as if another writer had
    /// changed it.
    pub fn fail_next_writes(&self, lot_id: &str, count: u32) {
        self.lock().injected.insert(lot_id.to_string(), count);
    }

    /// Version mismatches and commit-time conflicts seen so far.
    pub fn conflicts_observed(&self) -> u64 {
        self.lock().conflicts
    }

    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LotStore for InMemoryLotStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> StockResult<MemoryUnit> {
        Ok(MemoryUnit {
            state: Arc::clone(&self.state),
            staged: BTreeMap::new(),
            savepoints: Vec::new(),
        })
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// A pending change to one lot.
#[derive(Debug, Clone)]
struct Staged {
    /// Committed version this change was built on; `None` for new lots.
    base_version: Option<i64>,
    /// State after commit; `None` once deleted.
    lot: Option<StockLot>,
}

type Overlay = BTreeMap<String, Staged>;

/// One unit of work against an [`InMemoryLotStore`].
#[derive(Debug)]
pub struct MemoryUnit {
    state: Arc<Mutex<State>>,
    staged: Overlay,
    savepoints: Vec<Overlay>,
}

impl MemoryUnit {
    /// The lot as this unit sees it: staged change first, then committed.
    fn visible(&self, state: &State, lot_id: &str) -> Option<StockLot> {
        match self.staged.get(lot_id) {
            Some(staged) => staged.lot.clone(),
            None => state.lots.get(lot_id).cloned(),
        }
    }

    /// Base version for a new staged change to `lot_id`.
    fn base_for(&self, lot_id: &str, read_version: i64) -> Option<i64> {
        match self.staged.get(lot_id) {
            Some(staged) => staged.base_version,
            None => Some(read_version),
        }
    }

    /// Shared version gate for writes and deletes.
    fn check_version(&self, state: &mut State, lot: &StockLot) -> Option<StockLot> {
        if let Some(remaining) = state.injected.get_mut(&lot.id) {
            if *remaining > 0 {
                *remaining -= 1;
                state.conflicts += 1;
                debug!(lot_id = %lot.id, "Injected version mismatch");
                return None;
            }
        }

        match self.visible(state, &lot.id) {
            Some(current) if current.version == lot.version => Some(current),
            _ => {
                state.conflicts += 1;
                None
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lots_for_product(&mut self, product_id: &str, shop_id: &str) -> StockResult<Vec<StockLot>> {
        let mut lots: BTreeMap<String, StockLot> = {
            let state = lock_state(&self.state);
            state
                .lots
                .values()
                .filter(|l| l.product_id == product_id && l.shop_id == shop_id)
                .map(|l| (l.id.clone(), l.clone()))
                .collect()
        };

        for (id, staged) in &self.staged {
            match &staged.lot {
                Some(lot) if lot.product_id == product_id && lot.shop_id == shop_id => {
                    lots.insert(id.clone(), lot.clone());
                }
                Some(_) => {}
                None => {
                    lots.remove(id);
                }
            }
        }

        tokio::task::yield_now().await;

        let mut lots: Vec<StockLot> = lots.into_values().collect();
        sort_fifo(&mut lots);
        Ok(lots)
    }

    async fn lot(&mut self, lot_id: &str) -> StockResult<Option<StockLot>> {
        let lot = {
            let state = lock_state(&self.state);
            self.visible(&state, lot_id)
        };
        tokio::task::yield_now().await;
        Ok(lot)
    }

    async fn write_quantity(&mut self, lot: &StockLot, quantity: i64) -> StockResult<WriteOutcome> {
        if quantity < 0 {
            return Err(StockError::storage(format!(
                "quantity of lot {} would become {}",
                lot.id, quantity
            )));
        }

        let current = {
            let mut state = lock_state(&self.state);
            self.check_version(&mut state, lot)
        };
        let Some(current) = current else {
            return Ok(WriteOutcome::VersionMismatch);
        };

        let new_version = current.version + 1;
        let staged = Staged {
            base_version: self.base_for(&lot.id, lot.version),
            lot: Some(current.with_quantity(quantity, new_version)),
        };
        self.staged.insert(lot.id.clone(), staged);

        Ok(WriteOutcome::Written { new_version })
    }

    async fn insert_lot(&mut self, lot: &StockLot) -> StockResult<()> {
        let exists = {
            let state = lock_state(&self.state);
            self.visible(&state, &lot.id).is_some() || state.lots.contains_key(&lot.id)
        };
        if exists {
            return Err(StockError::storage(format!("lot {} already exists", lot.id)));
        }

        self.staged.insert(
            lot.id.clone(),
            Staged {
                base_version: None,
                lot: Some(lot.clone()),
            },
        );
        Ok(())
    }

    async fn delete_lot(&mut self, lot: &StockLot) -> StockResult<WriteOutcome> {
        let current = {
            let mut state = lock_state(&self.state);
            self.check_version(&mut state, lot)
        };
        if current.is_none() {
            return Ok(WriteOutcome::VersionMismatch);
        }

        let staged = Staged {
            base_version: self.base_for(&lot.id, lot.version),
            lot: None,
        };
        self.staged.insert(lot.id.clone(), staged);

        Ok(WriteOutcome::Written {
            new_version: lot.version,
        })
    }

    async fn savepoint(&mut self) -> StockResult<()> {
        self.savepoints.push(self.staged.clone());
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> StockResult<()> {
        let restored = self
            .savepoints
            .pop()
            .ok_or_else(|| StockError::storage("no open savepoint"))?;
        self.staged = restored;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> StockResult<()> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StockError::storage("no open savepoint"))
    }

    async fn commit(self) -> StockResult<()> {
        let mut state = lock_state(&self.state);

        for (id, staged) in &self.staged {
            let committed = state.lots.get(id).map(|l| l.version);
            if committed != staged.base_version {
                state.conflicts += 1;
                debug!(lot_id = %id, ?committed, base = ?staged.base_version, "Commit conflict");
                return Err(StockError::conflict(id.clone(), 1));
            }
        }

        for (id, staged) in self.staged {
            match staged.lot {
                Some(lot) => {
                    state.lots.insert(id, lot);
                }
                None => {
                    state.lots.remove(&id);
                }
            }
        }
        state.commits += 1;

        Ok(())
    }

    async fn rollback(self) -> StockResult<()> {
        Ok(())
    }
}
