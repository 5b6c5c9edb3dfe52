//! # Sale Repository
//!
//! Point-of-sale transactions: one atomic unit from stock check to ledger.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. EXECUTE (one transaction)                                          │
//! │     ├── lock every SKU's inventory row, sorted by SKU                  │
//! │     ├── quantity > available on any line → InsufficientStock, rollback │
//! │     ├── INSERT sales (COMPLETED) + sale_items                          │
//! │     └── ledger SALE -qty per line, reference SALE-<id>                 │
//! │                                                                         │
//! │  2. (OPTIONAL) REFUND (one transaction)                                │
//! │     ├── COMPLETED → REFUNDED, payment_status REFUNDED                  │
//! │     └── ledger RETURN +qty per line, reference REFUND-<id>             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A sale is not idempotent: callers must not blindly retry one that failed
//! with a concurrency conflict after it may have committed.

use chrono::Utc;
use duka_core::validation::{validate_actor, validate_sale_lines};
use duka_core::{
    CoreError, MovementType, NewSale, NewStockMovement, Sale, SaleItem, SalePaymentStatus,
    SaleStatus,
};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::{ledger, lock_rows, new_id};
use crate::error::{DbError, DbResult};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Rings up a sale.
    ///
    /// ## Errors
    /// - Validation: empty or oversized item list, duplicate SKUs, bad
    ///   quantities or prices, missing sales agent
    /// - `NotFound` for an unknown SKU
    /// - `InsufficientStock` naming the first short line; nothing is written
    pub async fn execute_sale(&self, sale: NewSale) -> DbResult<Sale> {
        validate_sale_lines(&sale.items)?;
        validate_actor("sales_agent", &sale.sales_agent)?;
        let total = sale.total_amount()?;

        let mut lines: Vec<_> = sale.items.iter().collect();
        // Fixed lock order keeps two multi-SKU sales from waiting on each other.
        lines.sort_by(|a, b| a.sku.cmp(&b.sku));

        let mut tx = self.pool.begin().await?;

        for line in &lines {
            let available = ledger::lock_inventory(&mut tx, &line.sku).await?;
            if line.quantity > available {
                warn!(sku = %line.sku, available, requested = line.quantity, "Sale refused");
                return Err(CoreError::InsufficientStock {
                    sku: line.sku.clone(),
                    available,
                    requested: line.quantity,
                }
                .into());
            }
        }

        let now = Utc::now();
        let header = Sale {
            id: new_id(),
            sale_date: now,
            total_amount_cents: total.cents(),
            customer_id: sale.customer_id.clone(),
            sales_outlet: sale.sales_outlet.clone(),
            sales_agent: sale.sales_agent.trim().to_string(),
            status: SaleStatus::Completed,
            payment_method: sale.payment_method,
            payment_status: sale.payment_status,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, sale_date, total_amount_cents, customer_id, sales_outlet,
                sales_agent, status, payment_method, payment_status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?2, ?2)
            "#,
        )
        .bind(&header.id)
        .bind(now)
        .bind(header.total_amount_cents)
        .bind(&header.customer_id)
        .bind(&header.sales_outlet)
        .bind(&header.sales_agent)
        .bind(header.status)
        .bind(header.payment_method)
        .bind(header.payment_status)
        .execute(&mut *tx)
        .await?;

        for line in &sale.items {
            sqlx::query(
                r#"
                INSERT INTO sale_items (id, sale_id, sku, quantity, unit_price_cents, unit_measure)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(new_id())
            .bind(&header.id)
            .bind(&line.sku)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .bind(&line.unit_measure)
            .execute(&mut *tx)
            .await?;
        }

        let reference = header.ledger_reference();
        for line in &lines {
            let movement = NewStockMovement::new(&line.sku, MovementType::Sale, -line.quantity)
                .unit_cost(line.unit_price())
                .reference(&reference)
                .performed_by(&header.sales_agent);
            ledger::apply_movement(&mut tx, &movement).await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %header.id,
            lines = sale.items.len(),
            total = header.total_amount_cents,
            agent = %header.sales_agent,
            "Sale completed"
        );
        Ok(header)
    }

    /// Refunds a completed sale and puts its units back on the shelf.
    pub async fn refund_sale(&self, sale_id: &str, performed_by: &str) -> DbResult<Sale> {
        validate_actor("performed_by", performed_by)?;

        let mut tx = self.pool.begin().await?;
        if !lock_rows(&mut tx, "sales", "id", sale_id).await? {
            return Err(DbError::not_found("Sale", sale_id));
        }

        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?1")
            .bind(sale_id)
            .fetch_one(&mut *tx)
            .await?;

        if sale.status != SaleStatus::Completed {
            return Err(
                CoreError::invalid_transition("Sale", sale_id, sale.status, SaleStatus::Refunded).into(),
            );
        }

        let items = sqlx::query_as::<_, SaleItem>(
            "SELECT * FROM sale_items WHERE sale_id = ?1 ORDER BY sku",
        )
        .bind(sale_id)
        .fetch_all(&mut *tx)
        .await?;

        let reference = format!("REFUND-{}", sale_id);
        for item in &items {
            let movement = NewStockMovement::new(&item.sku, MovementType::Return, item.quantity)
                .unit_cost(item.unit_price())
                .reference(&reference)
                .performed_by(performed_by);
            ledger::apply_movement(&mut tx, &movement).await?;
        }

        let refunded = sqlx::query_as::<_, Sale>(
            r#"
            UPDATE sales SET status = ?2, payment_status = ?3, updated_at = ?4
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Refunded)
        .bind(SalePaymentStatus::Refunded)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(sale_id, lines = items.len(), performed_by, "Sale refunded");
        Ok(refunded)
    }

    /// Gets a sale by ID.
    pub async fn get_sale(&self, sale_id: &str) -> DbResult<Sale> {
        sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE id = ?1")
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))
    }

    pub async fn items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        debug!(sale_id, "Loading sale items");
        let items = sqlx::query_as::<_, SaleItem>(
            "SELECT * FROM sale_items WHERE sale_id = ?1 ORDER BY rowid",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_db, file_db_with, seed_sku, test_db};
    use std::time::Duration;
    use duka_core::{Money, NewSaleLine, SalePaymentMethod, ValidationError};

    fn sale_of(lines: Vec<NewSaleLine>) -> NewSale {
        NewSale {
            items: lines,
            customer_id: None,
            sales_outlet: Some("Kariakoo".to_string()),
            sales_agent: "agent-1".to_string(),
            payment_method: SalePaymentMethod::Cash,
            payment_status: SalePaymentStatus::Paid,
        }
    }

    #[tokio::test]
    async fn test_sale_decrements_stock_and_records_movements() {
        let db = test_db().await;
        let phone = seed_sku(&db, "SAL-PH-BLA", 10).await;
        let case = seed_sku(&db, "SAL-CA-RED", 4).await;

        let sale = db
            .sales()
            .execute_sale(sale_of(vec![
                NewSaleLine::new(&phone, 3, Money::from_cents(45_000)),
                NewSaleLine::new(&case, 2, Money::from_cents(2_500)),
            ]))
            .await
            .unwrap();

        assert_eq!(sale.total_amount_cents, 140_000);
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(db.sales().items(&sale.id).await.unwrap().len(), 2);

        assert_eq!(db.inventory().get(&phone).await.unwrap().quantity_in_stock, 7);
        let history = db.inventory().history(&phone, 1).await.unwrap();
        assert_eq!(history[0].movement_type, MovementType::Sale);
        assert_eq!(history[0].quantity_change, -3);
        assert_eq!(history[0].reference_id, Some(format!("SALE-{}", sale.id)));
    }

    #[tokio::test]
    async fn test_shortfall_rolls_back_whole_sale() {
        let db = test_db().await;
        let a = seed_sku(&db, "SAL-SH-AAA", 3).await;
        let b = seed_sku(&db, "SAL-SH-BBB", 10).await;

        let err = db
            .sales()
            .execute_sale(sale_of(vec![
                NewSaleLine::new(&b, 2, Money::from_cents(100)),
                NewSaleLine::new(&a, 5, Money::from_cents(100)),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { ref sku, available: 3, requested: 5 }) if sku == &a
        ));
        assert_eq!(db.inventory().get(&a).await.unwrap().quantity_in_stock, 3);
        assert_eq!(db.inventory().get(&b).await.unwrap().quantity_in_stock, 10);

        let sales: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(sales, 0);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_and_empty_lines() {
        let db = test_db().await;
        let a = seed_sku(&db, "SAL-DU-AAA", 10).await;

        let dup = db
            .sales()
            .execute_sale(sale_of(vec![
                NewSaleLine::new(&a, 1, Money::from_cents(100)),
                NewSaleLine::new(&a, 1, Money::from_cents(100)),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(dup.as_validation(), Some(ValidationError::Duplicate { .. })));

        let empty = db.sales().execute_sale(sale_of(vec![])).await.unwrap_err();
        assert!(matches!(empty.as_validation(), Some(ValidationError::Empty { .. })));
    }

    #[tokio::test]
    async fn test_oversized_price_rejected_before_any_write() {
        let db = test_db().await;
        let sku = seed_sku(&db, "SAL-OV-RED", 10).await;

        let err = db
            .sales()
            .execute_sale(sale_of(vec![NewSaleLine::new(&sku, 3, Money::from_cents(i64::MAX / 2))]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::OutOfRange { field, .. }) if field == "unit_price"
        ));

        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 10);
        let sales: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(sales, 0);
    }

    #[tokio::test]
    async fn test_lock_wait_past_busy_timeout_is_a_conflict() {
        let (db, _guard) = file_db_with(|config| config.busy_timeout(Duration::from_millis(50))).await;
        let sku = seed_sku(&db, "SAL-BZ-RED", 5).await;

        let mut holder = db.pool().begin().await.unwrap();
        ledger::lock_inventory(&mut holder, &sku).await.unwrap();

        let err = db
            .sales()
            .execute_sale(sale_of(vec![NewSaleLine::new(&sku, 1, Money::from_cents(100))]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConcurrencyConflict(_)), "got {err}");
        assert!(err.is_retryable());

        holder.rollback().await.unwrap();

        let check = db.inventory().verify_ledger(&sku).await.unwrap();
        assert_eq!(check.cached, 5);
        assert!(check.is_consistent());

        // The retry goes through once the lock is gone.
        db.sales()
            .execute_sale(sale_of(vec![NewSaleLine::new(&sku, 1, Money::from_cents(100))]))
            .await
            .unwrap();
        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 4);
    }

    #[tokio::test]
    async fn test_refund_restores_stock_once() {
        let db = test_db().await;
        let a = seed_sku(&db, "SAL-RF-AAA", 5).await;

        let sale = db
            .sales()
            .execute_sale(sale_of(vec![NewSaleLine::new(&a, 2, Money::from_cents(900))]))
            .await
            .unwrap();

        let refunded = db.sales().refund_sale(&sale.id, "manager").await.unwrap();
        assert_eq!(refunded.status, SaleStatus::Refunded);
        assert_eq!(refunded.payment_status, SalePaymentStatus::Refunded);
        assert_eq!(db.inventory().get(&a).await.unwrap().quantity_in_stock, 5);

        let again = db.sales().refund_sale(&sale.id, "manager").await.unwrap_err();
        assert!(matches!(again, DbError::Domain(CoreError::InvalidTransition { .. })));
        assert!(db.inventory().verify_ledger(&a).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_concurrent_sales_never_oversell() {
        let (db, _guard) = file_db().await;
        let sku = seed_sku(&db, "SAL-CO-RED", 5).await;

        let mut handles = Vec::new();
        for agent in 0..2 {
            let db = db.clone();
            let sku = sku.clone();
            handles.push(tokio::spawn(async move {
                let mut sale = sale_of(vec![NewSaleLine::new(&sku, 3, Money::from_cents(100))]);
                sale.sales_agent = format!("agent-{}", agent);
                db.sales().execute_sale(sale).await
            }));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(DbError::Domain(CoreError::InsufficientStock { available: 2, requested: 3, .. })) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(completed, 1);
        let check = db.inventory().verify_ledger(&sku).await.unwrap();
        assert_eq!(check.cached, 2);
        assert!(check.is_consistent());
    }

    #[tokio::test]
    async fn test_ledger_stays_consistent_across_mixed_operations() {
        let db = test_db().await;
        let sku = seed_sku(&db, "SAL-MX-RED", 20).await;

        let sale = db
            .sales()
            .execute_sale(sale_of(vec![NewSaleLine::new(&sku, 7, Money::from_cents(100))]))
            .await
            .unwrap();
        db.inventory().adjust_stock(&sku, -3, "breakage", "clerk").await.unwrap();
        db.sales().refund_sale(&sale.id, "manager").await.unwrap();
        db.inventory().adjust_stock(&sku, 4, "found in back room", "clerk").await.unwrap();

        let check = db.inventory().verify_ledger(&sku).await.unwrap();
        assert_eq!(check.cached, 21);
        assert_eq!(check.ledger_sum, 21);
    }
}
