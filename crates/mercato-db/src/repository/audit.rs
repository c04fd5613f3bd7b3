//! # Audit Repository
//!
//! Append-only history of lot mutations in `stock_audit`.
//!
//! Rows are only ever inserted. There is no update or delete path, and the
//! table has no foreign key to `stock_lots` so history outlives written-off
//! lots.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use mercato_core::{AuditRecord, AuditSink, StockResult};

/// Repository for audit rows; also the ledger's [`AuditSink`].
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteAuditSink { pool }
    }

    /// Appends one record.
    pub async fn insert(&self, record: &AuditRecord) -> DbResult<()> {
        debug!(lot_id = %record.lot_id, operation = %record.operation, "Recording audit");

        sqlx::query(
            r#"
            INSERT INTO stock_audit (
                id, lot_id, product_id, shop_id, operation,
                old_quantity, new_quantity, old_version, new_version, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&record.id)
        .bind(&record.lot_id)
        .bind(&record.product_id)
        .bind(&record.shop_id)
        .bind(record.operation)
        .bind(record.old_quantity)
        .bind(record.new_quantity)
        .bind(record.old_version)
        .bind(record.new_version)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// History of one lot, oldest first.
    pub async fn history_for_lot(&self, lot_id: &str) -> DbResult<Vec<AuditRecord>> {
        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, lot_id, product_id, shop_id, operation,
                   old_quantity, new_quantity, old_version, new_version, recorded_at
            FROM stock_audit
            WHERE lot_id = ?1
            ORDER BY recorded_at, rowid
            "#,
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// History of every lot of (product, shop), oldest first.
    pub async fn history_for_product(
        &self,
        product_id: &str,
        shop_id: &str,
    ) -> DbResult<Vec<AuditRecord>> {
        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, lot_id, product_id, shop_id, operation,
                   old_quantity, new_quantity, old_version, new_version, recorded_at
            FROM stock_audit
            WHERE product_id = ?1 AND shop_id = ?2
            ORDER BY recorded_at, rowid
            "#,
        )
        .bind(product_id)
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_audit")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: AuditRecord) -> StockResult<()> {
        self.insert(&record)
            .await
            .map_err(|e| e.into_stock_error(&record.lot_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::NaiveDate;
    use mercato_core::{NewLot, OperationType, StockLot};

    #[tokio::test]
    async fn test_records_round_trip_in_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sink = db.audit();

        let purchased = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let lot = StockLot::from_new(NewLot::new("milk", "shop-1", 10, purchased));
        let after = lot.with_quantity(6, 1);

        sink.record(AuditRecord::capture(None, &lot, OperationType::Insert))
            .await
            .unwrap();
        sink.record(AuditRecord::capture(Some(&lot), &after, OperationType::Update))
            .await
            .unwrap();

        let history = sink.history_for_lot(&lot.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, OperationType::Insert);
        assert_eq!(history[1].operation, OperationType::Update);
        assert_eq!(history[1].old_quantity, Some(10));
        assert_eq!(history[1].new_quantity, Some(6));
        assert_eq!(history[1].new_version, Some(1));

        let by_product = sink.history_for_product("milk", "shop-1").await.unwrap();
        assert_eq!(by_product.len(), 2);
        assert_eq!(sink.count().await.unwrap(), 2);
    }
}
