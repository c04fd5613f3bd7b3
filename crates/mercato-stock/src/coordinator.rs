//! # Sale Coordinator
//!
//! Drives a sale from draft to completed and ties the stock decrease to the
//! payment.
//!
//! ## Sale Lifecycle
//! ```text
//! open_sale ──► Draft ──add_item / remove_item / adjust_quantity──► Draft
//!                 │
//!                 └── finalize(payment) ──► Completed (immutable)
//! ```
//!
//! ## Finalization (one SQLite transaction)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    INSERT payment                                                       │
//! │    UPDATE sales SET status = 'completed' WHERE status = 'draft'        │
//! │    re-read lines: edited since load → SaleChanged                      │
//! │    for each product on the sale: FIFO decrease (savepoint + retry)     │
//! │  COMMIT                    ─── audit records flushed after this point  │
//! │                                                                         │
//! │  Any failure → ROLLBACK: no payment, sale stays draft, lots untouched  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Availability checks while editing a draft are advisory. Stock is only
//! taken at finalization, and a shortfall there fails the whole sale.

use tracing::{debug, info, warn};

use mercato_core::validation::validate_id;
use mercato_core::{Payment, PaymentMethod, Sale, StockError, StockResult};
use mercato_db::{Database, SaleRepository, SqliteLotStore, SqliteUnit};

use crate::ledger::{StockLedger, StockTransaction};

/// Sale workflow over the SQLite store.
#[derive(Clone)]
pub struct SaleCoordinator {
    db: Database,
    ledger: StockLedger<SqliteLotStore>,
}

impl SaleCoordinator {
    pub fn new(db: Database, ledger: StockLedger<SqliteLotStore>) -> Self {
        SaleCoordinator { db, ledger }
    }

    pub fn ledger(&self) -> &StockLedger<SqliteLotStore> {
        &self.ledger
    }

    fn sales(&self) -> SaleRepository {
        self.db.sales()
    }

    // =========================================================================
    // Draft Editing
    // =========================================================================

    /// Opens an empty draft sale for a shop.
    pub async fn open_sale(&self, shop_id: &str, is_deferred: bool) -> StockResult<Sale> {
        validate_id("shop_id", shop_id)?;

        let sale = Sale::new(shop_id, is_deferred);
        self.sales().insert_sale(&sale).await?;

        info!(sale_id = %sale.id, shop_id, is_deferred, "Sale opened");
        Ok(sale)
    }

    pub async fn get_sale(&self, sale_id: &str) -> StockResult<Sale> {
        self.sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| StockError::SaleNotFound(sale_id.to_string()))
    }

    /// Adds units of a product to a draft sale.
    ///
    /// Fails with `InsufficientStock` if the resulting line quantity is
    /// more than the shop currently holds.
    pub async fn add_item(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
        unit_price_cents: i64,
    ) -> StockResult<Sale> {
        validate_id("product_id", product_id)?;

        let mut sale = self.get_sale(sale_id).await?;
        sale.add_item(product_id, quantity, unit_price_cents)?;
        self.check_line_availability(&sale, product_id).await?;
        self.save(&sale).await?;

        debug!(sale_id, product_id, quantity, total_cents = sale.total_cents, "Item added");
        Ok(sale)
    }

    pub async fn remove_item(&self, sale_id: &str, product_id: &str) -> StockResult<Sale> {
        let mut sale = self.get_sale(sale_id).await?;
        sale.remove_item(product_id)?;
        self.save(&sale).await?;

        debug!(sale_id, product_id, total_cents = sale.total_cents, "Item removed");
        Ok(sale)
    }

    /// Sets the quantity of a product already on the sale.
    pub async fn adjust_quantity(
        &self,
        sale_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> StockResult<Sale> {
        let mut sale = self.get_sale(sale_id).await?;
        sale.set_quantity(product_id, quantity)?;
        self.check_line_availability(&sale, product_id).await?;
        self.save(&sale).await?;

        debug!(sale_id, product_id, quantity, total_cents = sale.total_cents, "Quantity adjusted");
        Ok(sale)
    }

    async fn check_line_availability(&self, sale: &Sale, product_id: &str) -> StockResult<()> {
        let Some(line) = sale.line(product_id) else {
            return Ok(());
        };

        if self
            .ledger
            .validate_availability(product_id, &sale.shop_id, line.quantity)
            .await?
        {
            return Ok(());
        }

        let available = self
            .ledger
            .get_total_quantity(product_id, &sale.shop_id)
            .await?;
        Err(StockError::InsufficientStock {
            product_id: product_id.to_string(),
            shop_id: sale.shop_id.clone(),
            requested: line.quantity,
            available,
        })
    }

    async fn save(&self, sale: &Sale) -> StockResult<()> {
        if !self.sales().save_lines(sale).await? {
            return Err(StockError::SaleFinalized(sale.id.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Records the payment and takes the stock, atomically.
    ///
    /// Not retried as a whole: per-product conflicts are retried inside the
    /// transaction, and anything that still fails rolls everything back.
    pub async fn finalize(
        &self,
        sale_id: &str,
        method: PaymentMethod,
        amount_cents: i64,
    ) -> StockResult<Sale> {
        let sale = self.get_sale(sale_id).await?;
        self.finalize_loaded(sale, method, amount_cents).await
    }

    async fn finalize_loaded(
        &self,
        mut sale: Sale,
        method: PaymentMethod,
        amount_cents: i64,
    ) -> StockResult<Sale> {
        let payment = Payment::new(&sale.id, method, amount_cents);
        sale.record_payment(payment.clone())?;

        let mut tx = self.ledger.begin().await?;
        match self.complete_in(&mut tx, &sale, &payment).await {
            Ok(()) => {
                self.ledger.commit(tx).await?;
                info!(
                    sale_id = %sale.id,
                    total_cents = sale.total_cents,
                    amount_cents,
                    method = ?method,
                    "Sale finalized"
                );
                Ok(sale)
            }
            Err(err) => {
                warn!(sale_id = %sale.id, error = %err, "Sale finalization rolled back");
                if let Err(rollback_err) = self.ledger.rollback(tx).await {
                    warn!(sale_id = %sale.id, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn complete_in(
        &self,
        tx: &mut StockTransaction<SqliteUnit>,
        sale: &Sale,
        payment: &Payment,
    ) -> StockResult<()> {
        let conn = tx.unit_mut().connection();
        SaleRepository::insert_payment_in(conn, payment).await?;
        if !SaleRepository::mark_completed_in(conn, sale).await? {
            return Err(StockError::SaleFinalized(sale.id.clone()));
        }
        // The writes above hold the database write lock, so this read is
        // current until commit.
        if SaleRepository::lines_in(conn, &sale.id).await? != sale.lines {
            return Err(StockError::SaleChanged(sale.id.clone()));
        }

        self.ledger.decrease_for_sale_in(tx, sale).await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mercato_core::{NewLot, SaleStatus};
    use mercato_db::DbConfig;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    async fn setup() -> (SaleCoordinator, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = StockLedger::new(db.lots(), Arc::new(db.audit()));
        (SaleCoordinator::new(db.clone(), ledger), db)
    }

    async fn stock(coordinator: &SaleCoordinator, product: &str, qty: i64, expires: u32) -> String {
        coordinator
            .ledger()
            .receive_lot(NewLot::new(product, "shop-1", qty, day(1)).expiring(day(expires)))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_open_and_edit_draft() {
        let (coordinator, _) = setup().await;
        stock(&coordinator, "milk", 10, 20).await;

        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        assert_eq!(sale.status, SaleStatus::Draft);

        coordinator.add_item(&sale.id, "milk", 2, 150).await.unwrap();
        let sale = coordinator.add_item(&sale.id, "milk", 1, 999).await.unwrap();
        assert_eq!(sale.lines.len(), 1);
        assert_eq!(sale.lines[0].quantity, 3);
        assert_eq!(sale.total_cents, 450);

        let sale = coordinator.adjust_quantity(&sale.id, "milk", 5).await.unwrap();
        assert_eq!(sale.total_cents, 750);

        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert_eq!(reloaded.lines, sale.lines);
        assert_eq!(reloaded.total_cents, 750);

        let sale = coordinator.remove_item(&sale.id, "milk").await.unwrap();
        assert!(sale.lines.is_empty());
        assert_eq!(sale.total_cents, 0);
    }

    #[tokio::test]
    async fn test_add_item_beyond_stock_is_rejected() {
        let (coordinator, _) = setup().await;
        stock(&coordinator, "milk", 4, 20).await;
        let sale = coordinator.open_sale("shop-1", false).await.unwrap();

        let err = coordinator.add_item(&sale.id, "milk", 5, 100).await.unwrap_err();
        assert!(matches!(
            err,
            StockError::InsufficientStock {
                requested: 5,
                available: 4,
                ..
            }
        ));

        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert!(reloaded.lines.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sale() {
        let (coordinator, _) = setup().await;

        let err = coordinator.get_sale("missing").await.unwrap_err();
        assert_eq!(err, StockError::SaleNotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_finalize_takes_stock_and_records_payment() {
        let (coordinator, db) = setup().await;
        let early = stock(&coordinator, "milk", 2, 5).await;
        let late = stock(&coordinator, "milk", 10, 25).await;

        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        coordinator.add_item(&sale.id, "milk", 3, 200).await.unwrap();

        let done = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 600)
            .await
            .unwrap();
        assert!(done.is_finalized());

        let lots = db.lots();
        assert_eq!(lots.get_by_id(&early).await.unwrap().unwrap().quantity, 0);
        assert_eq!(lots.get_by_id(&late).await.unwrap().unwrap().quantity, 9);

        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert_eq!(reloaded.status, SaleStatus::Completed);
        assert_eq!(db.sales().payments_for(&sale.id).await.unwrap().len(), 1);

        // 2 receipts + 2 decrements
        assert_eq!(db.audit().count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_finalized_sale_is_immutable() {
        let (coordinator, _) = setup().await;
        stock(&coordinator, "milk", 10, 20).await;
        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        coordinator.add_item(&sale.id, "milk", 1, 100).await.unwrap();
        coordinator
            .finalize(&sale.id, PaymentMethod::ExternalCard, 100)
            .await
            .unwrap();

        let err = coordinator.add_item(&sale.id, "milk", 1, 100).await.unwrap_err();
        assert!(matches!(err, StockError::SaleFinalized(_)));

        let err = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::SaleFinalized(_)));
    }

    #[tokio::test]
    async fn test_empty_sale_cannot_be_finalized() {
        let (coordinator, _) = setup().await;
        let sale = coordinator.open_sale("shop-1", false).await.unwrap();

        let err = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::EmptySale(_)));
    }

    #[tokio::test]
    async fn test_shortfall_at_finalize_rolls_everything_back() {
        let (coordinator, db) = setup().await;
        let milk = stock(&coordinator, "milk", 5, 20).await;
        stock(&coordinator, "bread", 3, 20).await;

        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        coordinator.add_item(&sale.id, "milk", 2, 100).await.unwrap();
        coordinator.add_item(&sale.id, "bread", 3, 250).await.unwrap();

        // Another register sells bread in the meantime
        coordinator
            .ledger()
            .decrease_for_product("bread", "shop-1", 2)
            .await
            .unwrap();
        let audit_before = db.audit().count().await.unwrap();

        let err = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 950)
            .await
            .unwrap_err();
        assert!(err.is_insufficient());

        let lots = db.lots();
        assert_eq!(lots.get_by_id(&milk).await.unwrap().unwrap().quantity, 5);
        assert_eq!(lots.total_quantity("bread", "shop-1").await.unwrap(), 1);

        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert_eq!(reloaded.status, SaleStatus::Draft);
        assert!(db.sales().payments_for(&sale.id).await.unwrap().is_empty());
        assert_eq!(db.audit().count().await.unwrap(), audit_before);
    }

    #[tokio::test]
    async fn test_lines_edited_after_load_fail_finalization() {
        let (coordinator, db) = setup().await;
        let milk = stock(&coordinator, "milk", 5, 20).await;
        let bread = stock(&coordinator, "bread", 5, 20).await;

        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        coordinator.add_item(&sale.id, "milk", 1, 100).await.unwrap();
        let loaded = coordinator.get_sale(&sale.id).await.unwrap();

        // A second terminal edits the draft before payment goes through
        coordinator.add_item(&sale.id, "bread", 2, 250).await.unwrap();

        let err = coordinator
            .finalize_loaded(loaded, PaymentMethod::Cash, 100)
            .await
            .unwrap_err();
        assert_eq!(err, StockError::SaleChanged(sale.id.clone()));

        let lots = db.lots();
        assert_eq!(lots.get_by_id(&milk).await.unwrap().unwrap().quantity, 5);
        assert_eq!(lots.get_by_id(&bread).await.unwrap().unwrap().quantity, 5);
        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert_eq!(reloaded.status, SaleStatus::Draft);
        assert!(reloaded.payments.is_empty());

        let done = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 600)
            .await
            .unwrap();
        assert_eq!(done.lines.len(), 2);
        assert_eq!(lots.get_by_id(&milk).await.unwrap().unwrap().quantity, 4);
        assert_eq!(lots.get_by_id(&bread).await.unwrap().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_invalid_payment_amount() {
        let (coordinator, _) = setup().await;
        stock(&coordinator, "milk", 5, 20).await;
        let sale = coordinator.open_sale("shop-1", false).await.unwrap();
        coordinator.add_item(&sale.id, "milk", 1, 100).await.unwrap();

        let err = coordinator
            .finalize(&sale.id, PaymentMethod::Cash, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));

        let reloaded = coordinator.get_sale(&sale.id).await.unwrap();
        assert_eq!(reloaded.status, SaleStatus::Draft);
    }
}
