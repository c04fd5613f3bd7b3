//! # Lot Repository
//!
//! Stock lot storage with optimistic concurrency.
//!
//! ## Conditional Write
//! ```text
//! UPDATE stock_lots
//!    SET quantity = ?new, version = version + 1, last_modified = ?now
//!  WHERE id = ?lot AND version = ?expected
//!
//!  rows affected = 1  → Written { new_version: expected + 1 }
//!  rows affected = 0  → VersionMismatch (someone else wrote, or the lot is gone)
//! ```
//!
//! ## Savepoints
//! Savepoints are named by nesting depth (`sp_1`, `sp_2`, ...). Rolling back
//! to one undoes the writes issued since it was opened while keeping the
//! outer transaction alive.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, trace};

use crate::error::{DbError, DbResult};
use mercato_core::{LotStore, StockError, StockLot, StockResult, UnitOfWork, WriteOutcome};

/// Converts a sqlx error into a `StockError`, blaming `subject` on contention.
fn stock_error(err: sqlx::Error, subject: &str) -> StockError {
    DbError::from(err).into_stock_error(subject)
}

// =============================================================================
// Store
// =============================================================================

/// SQLite-backed [`LotStore`].
#[derive(Debug, Clone)]
pub struct SqliteLotStore {
    pool: SqlitePool,
}

impl SqliteLotStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteLotStore { pool }
    }

    /// Inserts a lot outside any unit of work (seeding, imports).
    pub async fn insert(&self, lot: &StockLot) -> DbResult<()> {
        debug!(id = %lot.id, product_id = %lot.product_id, quantity = lot.quantity, "Inserting lot");
        let mut conn = self.pool.acquire().await?;
        insert_lot(&mut conn, lot).await
    }

    /// Gets a lot by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<StockLot>> {
        let lot = sqlx::query_as::<_, StockLot>(
            r#"
            SELECT id, product_id, shop_id, quantity, version, expiration_date,
                   purchase_date, purchase_price_cents, supplier_id, last_modified
            FROM stock_lots
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(lot)
    }

    /// All lots of (product, shop) in FIFO order.
    pub async fn list_for_product(&self, product_id: &str, shop_id: &str) -> DbResult<Vec<StockLot>> {
        let mut conn = self.pool.acquire().await?;
        select_fifo(&mut conn, product_id, shop_id).await
    }

    /// Sum of lot quantities for (product, shop).
    pub async fn total_quantity(&self, product_id: &str, shop_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM stock_lots WHERE product_id = ?1 AND shop_id = ?2",
        )
        .bind(product_id)
        .bind(shop_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

#[async_trait]
impl LotStore for SqliteLotStore {
    type Unit = SqliteUnit;

    async fn begin(&self) -> StockResult<SqliteUnit> {
        let tx = self.pool.begin().await.map_err(|e| stock_error(e, "database"))?;
        Ok(SqliteUnit { tx, depth: 0 })
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// One SQLite transaction. Dropping it without commit rolls back.
pub struct SqliteUnit {
    tx: Transaction<'static, Sqlite>,
    depth: u32,
}

impl std::fmt::Debug for SqliteUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUnit").field("depth", &self.depth).finish()
    }
}

impl SqliteUnit {
    /// The transaction's connection, for writing other rows (sales,
    /// payments) atomically with lot changes.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    async fn execute_control(&mut self, sql: String) -> StockResult<()> {
        trace!(%sql, "savepoint control");
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| stock_error(e, "savepoint"))?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn lots_for_product(&mut self, product_id: &str, shop_id: &str) -> StockResult<Vec<StockLot>> {
        select_fifo(&mut self.tx, product_id, shop_id)
            .await
            .map_err(|e| e.into_stock_error(product_id))
    }

    async fn lot(&mut self, lot_id: &str) -> StockResult<Option<StockLot>> {
        sqlx::query_as::<_, StockLot>(
            r#"
            SELECT id, product_id, shop_id, quantity, version, expiration_date,
                   purchase_date, purchase_price_cents, supplier_id, last_modified
            FROM stock_lots
            WHERE id = ?1
            "#,
        )
        .bind(lot_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| stock_error(e, lot_id))
    }

    async fn write_quantity(&mut self, lot: &StockLot, quantity: i64) -> StockResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE stock_lots
            SET quantity = ?1, version = version + 1, last_modified = ?2
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(quantity)
        .bind(Utc::now())
        .bind(&lot.id)
        .bind(lot.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| stock_error(e, &lot.id))?;

        if result.rows_affected() == 0 {
            debug!(lot_id = %lot.id, expected_version = lot.version, "Version mismatch");
            return Ok(WriteOutcome::VersionMismatch);
        }

        Ok(WriteOutcome::Written {
            new_version: lot.version + 1,
        })
    }

    async fn insert_lot(&mut self, lot: &StockLot) -> StockResult<()> {
        insert_lot(&mut self.tx, lot)
            .await
            .map_err(|e| e.into_stock_error(&lot.id))
    }

    async fn delete_lot(&mut self, lot: &StockLot) -> StockResult<WriteOutcome> {
        let result = sqlx::query("DELETE FROM stock_lots WHERE id = ?1 AND version = ?2")
            .bind(&lot.id)
            .bind(lot.version)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| stock_error(e, &lot.id))?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::VersionMismatch);
        }

        Ok(WriteOutcome::Written {
            new_version: lot.version,
        })
    }

    async fn savepoint(&mut self) -> StockResult<()> {
        let sql = format!("SAVEPOINT sp_{}", self.depth + 1);
        self.execute_control(sql).await?;
        self.depth += 1;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> StockResult<()> {
        if self.depth == 0 {
            return Err(StockError::storage("no open savepoint"));
        }
        let depth = self.depth;
        self.execute_control(format!("ROLLBACK TO SAVEPOINT sp_{depth}"))
            .await?;
        self.execute_control(format!("RELEASE SAVEPOINT sp_{depth}"))
            .await?;
        self.depth -= 1;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> StockResult<()> {
        if self.depth == 0 {
            return Err(StockError::storage("no open savepoint"));
        }
        let depth = self.depth;
        self.execute_control(format!("RELEASE SAVEPOINT sp_{depth}"))
            .await?;
        self.depth -= 1;
        Ok(())
    }

    async fn commit(self) -> StockResult<()> {
        self.tx.commit().await.map_err(|e| stock_error(e, "commit"))
    }

    async fn rollback(self) -> StockResult<()> {
        self.tx.rollback().await.map_err(|e| stock_error(e, "rollback"))
    }
}

// =============================================================================
// Shared Queries
// =============================================================================

async fn select_fifo(
    conn: &mut SqliteConnection,
    product_id: &str,
    shop_id: &str,
) -> DbResult<Vec<StockLot>> {
    let lots = sqlx::query_as::<_, StockLot>(
        r#"
        SELECT id, product_id, shop_id, quantity, version, expiration_date,
               purchase_date, purchase_price_cents, supplier_id, last_modified
        FROM stock_lots
        WHERE product_id = ?1 AND shop_id = ?2
        ORDER BY expiration_date IS NULL, expiration_date, purchase_date, id
        "#,
    )
    .bind(product_id)
    .bind(shop_id)
    .fetch_all(conn)
    .await?;

    Ok(lots)
}

async fn insert_lot(conn: &mut SqliteConnection, lot: &StockLot) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_lots (
            id, product_id, shop_id, quantity, version, expiration_date,
            purchase_date, purchase_price_cents, supplier_id, last_modified
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&lot.id)
    .bind(&lot.product_id)
    .bind(&lot.shop_id)
    .bind(lot.quantity)
    .bind(lot.version)
    .bind(lot.expiration_date)
    .bind(lot.purchase_date)
    .bind(lot.purchase_price_cents)
    .bind(&lot.supplier_id)
    .bind(lot.last_modified)
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::NaiveDate;
    use mercato_core::NewLot;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    async fn seeded() -> (SqliteLotStore, StockLot, StockLot, StockLot) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = db.lots();

        let undated = StockLot::from_new(NewLot::new("milk", "shop-1", 7, day(1)));
        let late = StockLot::from_new(NewLot::new("milk", "shop-1", 10, day(1)).expiring(day(5)));
        let early = StockLot::from_new(NewLot::new("milk", "shop-1", 10, day(1)).expiring(day(2)));
        for lot in [&undated, &late, &early] {
            store.insert(lot).await.unwrap();
        }

        (store, early, late, undated)
    }

    #[tokio::test]
    async fn test_fifo_order_puts_undated_last() {
        let (store, early, late, undated) = seeded().await;

        let lots = store.list_for_product("milk", "shop-1").await.unwrap();
        let ids: Vec<_> = lots.iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec![early.id, late.id, undated.id]);
        assert_eq!(store.total_quantity("milk", "shop-1").await.unwrap(), 27);
        assert_eq!(store.total_quantity("milk", "shop-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conditional_write_checks_version() {
        let (store, early, _, _) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        let outcome = unit.write_quantity(&early, 4).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written { new_version: 1 });

        // Same stale snapshot again: version is now 1, not 0
        let outcome = unit.write_quantity(&early, 3).await.unwrap();
        assert_eq!(outcome, WriteOutcome::VersionMismatch);
        unit.commit().await.unwrap();

        let stored = store.get_by_id(&early.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 4);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (store, early, _, _) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        unit.write_quantity(&early, 0).await.unwrap();
        unit.rollback().await.unwrap();

        let stored = store.get_by_id(&early.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 10);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_savepoint_rollback_keeps_outer_writes() {
        let (store, early, late, _) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        unit.write_quantity(&early, 9).await.unwrap();

        unit.savepoint().await.unwrap();
        unit.write_quantity(&late, 1).await.unwrap();
        unit.rollback_to_savepoint().await.unwrap();

        unit.commit().await.unwrap();

        assert_eq!(store.get_by_id(&early.id).await.unwrap().unwrap().quantity, 9);
        assert_eq!(store.get_by_id(&late.id).await.unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_negative_quantity_is_rejected_by_schema() {
        let (store, early, _, _) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.write_quantity(&early, -1).await.unwrap_err();
        assert!(matches!(err, StockError::Storage(_)));
    }

    #[tokio::test]
    async fn test_delete_is_version_checked() {
        let (store, early, _, _) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        let stale = StockLot {
            version: 5,
            ..early.clone()
        };
        assert_eq!(
            unit.delete_lot(&stale).await.unwrap(),
            WriteOutcome::VersionMismatch
        );
        assert!(unit.delete_lot(&early).await.unwrap().is_written());
        assert!(unit.lot(&early.id).await.unwrap().is_none());
        unit.commit().await.unwrap();

        assert!(store.get_by_id(&early.id).await.unwrap().is_none());
    }
}
