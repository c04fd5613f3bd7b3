//! # Sale Repository
//!
//! Database operations for sales, sale lines and payments.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                       │
//! │     └── insert_sale() → Sale { status: Draft }                         │
//! │                                                                         │
//! │  2. EDIT LINES                                                         │
//! │     └── save_lines() → replaces lines, guarded by status = 'draft'     │
//! │                                                                         │
//! │  3. FINALIZE (inside the ledger's transaction)                         │
//! │     └── insert_payment_in()                                            │
//! │     └── mark_completed_in() → Sale { status: Completed }               │
//! │     └── lines_in() → must still match the lines being paid for         │
//! │     └── lot decrements on the same connection                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use mercato_core::{Payment, Sale, SaleLine, SaleStatus};

/// Header row of `sales`; lines and payments live in their own tables.
#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    shop_id: String,
    status: SaleStatus,
    total_cents: i64,
    is_deferred: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SaleRow {
    fn into_sale(self, lines: Vec<SaleLine>, payments: Vec<Payment>) -> Sale {
        Sale {
            id: self.id,
            shop_id: self.shop_id,
            status: self.status,
            total_cents: self.total_cents,
            is_deferred: self.is_deferred,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            lines,
            payments,
        }
    }
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Inserts a sale header together with its lines.
    pub async fn insert_sale(&self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, shop_id = %sale.shop_id, "Inserting sale");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, shop_id, status, total_cents, is_deferred,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.shop_id)
        .bind(sale.status)
        .bind(sale.total_cents)
        .bind(sale.is_deferred)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.completed_at)
        .execute(&mut *tx)
        .await?;

        insert_lines(&mut tx, sale).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Gets a sale with its lines and payments.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let row = sqlx::query_as::<_, SaleRow>(
            r#"
            SELECT id, shop_id, status, total_cents, is_deferred,
                   created_at, updated_at, completed_at
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut conn = self.pool.acquire().await?;
        let lines = Self::lines_in(&mut conn, id).await?;

        let payments = self.payments_for(id).await?;

        Ok(Some(row.into_sale(lines, payments)))
    }

    /// Payments recorded against a sale, oldest first.
    pub async fn payments_for(&self, sale_id: &str) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, sale_id, method, amount_cents, created_at
            FROM payments
            WHERE sale_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Replaces the lines and total of a draft sale.
    ///
    /// Returns `false` without writing if the sale is missing or no longer
    /// a draft.
    pub async fn save_lines(&self, sale: &Sale) -> DbResult<bool> {
        debug!(id = %sale.id, lines = sale.lines.len(), total_cents = sale.total_cents, "Saving sale lines");

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE sales
            SET total_cents = ?1, updated_at = ?2
            WHERE id = ?3 AND status = 'draft'
            "#,
        )
        .bind(sale.total_cents)
        .bind(Utc::now())
        .bind(&sale.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM sale_lines WHERE sale_id = ?1")
            .bind(&sale.id)
            .execute(&mut *tx)
            .await?;

        insert_lines(&mut tx, sale).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Lines of a sale in display order, read on the caller's connection.
    pub async fn lines_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let lines = sqlx::query_as::<_, SaleLine>(
            r#"
            SELECT id, product_id, quantity, unit_price_cents
            FROM sale_lines
            WHERE sale_id = ?1
            ORDER BY position
            "#,
        )
        .bind(sale_id)
        .fetch_all(conn)
        .await?;

        Ok(lines)
    }

    /// Inserts a payment on the caller's connection (usually a ledger
    /// transaction).
    pub async fn insert_payment_in(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(sale_id = %payment.sale_id, amount_cents = payment.amount_cents, "Inserting payment");

        sqlx::query(
            r#"
            INSERT INTO payments (id, sale_id, method, amount_cents, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(payment.method)
        .bind(payment.amount_cents)
        .bind(payment.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Moves a draft sale to completed on the caller's connection.
    ///
    /// Returns `false` if the sale was not a draft anymore, which means a
    /// concurrent finalization won.
    pub async fn mark_completed_in(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<bool> {
        let completed_at = sale.completed_at.unwrap_or_else(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = 'completed', completed_at = ?1, updated_at = ?1
            WHERE id = ?2 AND status = 'draft'
            "#,
        )
        .bind(completed_at)
        .bind(&sale.id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

async fn insert_lines(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    for (position, line) in sale.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sale_lines (id, sale_id, product_id, quantity, unit_price_cents, position)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&line.id)
        .bind(&sale.id)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use mercato_core::PaymentMethod;

    #[tokio::test]
    async fn test_sale_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let mut sale = Sale::new("shop-1", true);
        sale.add_item("milk", 2, 150).unwrap();
        repo.insert_sale(&sale).await.unwrap();

        sale.add_item("bread", 1, 300).unwrap();
        assert!(repo.save_lines(&sale).await.unwrap());

        let loaded = repo.get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SaleStatus::Draft);
        assert!(loaded.is_deferred);
        assert_eq!(loaded.lines.len(), 2);
        assert_eq!(loaded.lines[0].product_id, "milk");
        assert_eq!(loaded.total_cents, 600);
        assert!(loaded.payments.is_empty());

        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_sale_rejects_line_changes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let mut sale = Sale::new("shop-1", false);
        sale.add_item("milk", 1, 150).unwrap();
        repo.insert_sale(&sale).await.unwrap();

        let payment = Payment::new(&sale.id, PaymentMethod::ExternalCard, 150);
        sale.record_payment(payment.clone()).unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        SaleRepository::insert_payment_in(&mut conn, &payment).await.unwrap();
        assert!(SaleRepository::mark_completed_in(&mut conn, &sale).await.unwrap());
        // Second finalization loses
        assert!(!SaleRepository::mark_completed_in(&mut conn, &sale).await.unwrap());
        drop(conn);

        assert!(!repo.save_lines(&sale).await.unwrap());

        let loaded = repo.get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SaleStatus::Completed);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.payments.len(), 1);
        assert_eq!(loaded.payments[0].method, PaymentMethod::ExternalCard);
    }
}
