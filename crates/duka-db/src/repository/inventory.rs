//! # Inventory Repository
//!
//! Stock levels, manual adjustments and the ledger audit trail.
//!
//! ## Ledger Consistency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  inventory.quantity_in_stock  ==  Σ stock_movements.quantity_change     │
//! │                                                                         │
//! │  Writers (all through ledger::apply_movement, same transaction):       │
//! │    SALE     execute_sale, order stock finalization     (-qty)          │
//! │    RETURN   refund_sale                                (+qty)          │
//! │    RESTOCK  record_reception / update_reception        (+received)     │
//! │    ADJUST   adjust_stock, reception corrections        (±qty)          │
//! │                                                                         │
//! │  verify_ledger(sku) recomputes the right-hand side.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use duka_core::validation::validate_actor;
use duka_core::{
    Inventory, LedgerCheck, MovementType, NewStockMovement, StockMovement, ValidationError,
    MAX_LINE_QUANTITY,
};
use sqlx::SqlitePool;
use tracing::info;

use super::{ledger, lock_rows};
use crate::error::{DbError, DbResult};

/// Repository for inventory operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Applies a single movement in its own transaction.
    ///
    /// ## Returns
    /// The recorded movement and the resulting `quantity_in_stock`.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown SKU
    /// - `InsufficientStock` when the result would be negative
    /// - `ConcurrencyConflict` when the row stays locked past the busy timeout
    pub async fn apply_movement(&self, movement: NewStockMovement) -> DbResult<(StockMovement, i64)> {
        let mut tx = self.pool.begin().await?;
        let result = ledger::apply_movement(&mut tx, &movement).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Manual ADJUST movement; the reason becomes the movement reference.
    ///
    /// ## Example
    /// ```rust,ignore
    /// // Stock count found two units missing.
    /// db.inventory().adjust_stock("SAM-PH-BLA", -2, "Cycle count 2026-10", "clerk-4").await?;
    /// ```
    pub async fn adjust_stock(
        &self,
        sku: &str,
        quantity_change: i64,
        reason: &str,
        performed_by: &str,
    ) -> DbResult<(StockMovement, i64)> {
        if quantity_change == 0 {
            return Err(ValidationError::MustBeNonZero {
                field: "quantity_change".to_string(),
            }
            .into());
        }
        if quantity_change.unsigned_abs() > MAX_LINE_QUANTITY.unsigned_abs() {
            return Err(ValidationError::OutOfRange {
                field: "quantity_change".to_string(),
                min: -MAX_LINE_QUANTITY,
                max: MAX_LINE_QUANTITY,
            }
            .into());
        }
        if reason.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "reason".to_string(),
            }
            .into());
        }
        validate_actor("performed_by", performed_by)?;

        let movement = NewStockMovement::new(sku, MovementType::Adjust, quantity_change)
            .reference(reason.trim())
            .performed_by(performed_by);

        let (record, new_quantity) = self.apply_movement(movement).await?;
        info!(sku, quantity_change, new_quantity, reason, "Stock adjusted");
        Ok((record, new_quantity))
    }

    pub async fn get(&self, sku: &str) -> DbResult<Inventory> {
        sqlx::query_as::<_, Inventory>("SELECT * FROM inventory WHERE sku = ?1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Inventory", sku))
    }

    /// Movements for a SKU, newest first.
    pub async fn history(&self, sku: &str, limit: i64) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT * FROM stock_movements
            WHERE sku = ?1
            ORDER BY rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(sku)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Rows at or below their safety stock level.
    pub async fn low_stock(&self) -> DbResult<Vec<Inventory>> {
        let rows = sqlx::query_as::<_, Inventory>(
            r#"
            SELECT * FROM inventory
            WHERE quantity_in_stock <= safety_stock_level
            ORDER BY quantity_in_stock ASC, sku ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_safety_stock(&self, sku: &str, level: i64) -> DbResult<Inventory> {
        if level < 0 {
            return Err(ValidationError::OutOfRange {
                field: "safety_stock_level".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let mut tx = self.pool.begin().await?;
        if !lock_rows(&mut tx, "inventory", "sku", sku).await? {
            return Err(DbError::not_found("Inventory", sku));
        }
        let row = sqlx::query_as::<_, Inventory>(
            "UPDATE inventory SET safety_stock_level = ?2, updated_at = ?3 WHERE sku = ?1 RETURNING *",
        )
        .bind(sku)
        .bind(level)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row)
    }

    pub async fn set_location(&self, sku: &str, location: Option<&str>) -> DbResult<Inventory> {
        sqlx::query_as::<_, Inventory>(
            "UPDATE inventory SET location = ?2, updated_at = ?3 WHERE sku = ?1 RETURNING *",
        )
        .bind(sku)
        .bind(location)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Inventory", sku))
    }

    /// Compares the cached counter with the ledger sum.
    pub async fn verify_ledger(&self, sku: &str) -> DbResult<LedgerCheck> {
        let cached = self.get(sku).await?.quantity_in_stock;
        let ledger_sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity_change), 0) FROM stock_movements WHERE sku = ?1",
        )
        .bind(sku)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCheck {
            sku: sku.to_string(),
            cached,
            ledger_sum,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_sku, test_db};
    use duka_core::{CoreError, Money};

    #[tokio::test]
    async fn test_restock_sets_last_restock_date() {
        let db = test_db().await;
        let sku = seed_sku(&db, "TST-IN-RED", 0).await;
        assert!(db.inventory().get(&sku).await.unwrap().last_restock_date.is_none());

        let (movement, qty) = db
            .inventory()
            .apply_movement(
                NewStockMovement::new(&sku, MovementType::Restock, 12)
                    .unit_cost(Money::from_cents(1_000))
                    .reference("RECEPTION-x"),
            )
            .await
            .unwrap();

        assert_eq!(qty, 12);
        assert_eq!(movement.unit_cost_cents, 1_000);
        assert!(db.inventory().get(&sku).await.unwrap().last_restock_date.is_some());
    }

    #[tokio::test]
    async fn test_ledger_refuses_negative_stock() {
        let db = test_db().await;
        let sku = seed_sku(&db, "TST-IN-BLU", 3).await;

        let err = db.inventory().adjust_stock(&sku, -4, "damaged", "clerk").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { available: 3, requested: 4, .. })
        ));

        let check = db.inventory().verify_ledger(&sku).await.unwrap();
        assert_eq!(check.cached, 3);
        assert!(check.is_consistent());
    }

    #[tokio::test]
    async fn test_zero_adjustment_rejected() {
        let db = test_db().await;
        let sku = seed_sku(&db, "TST-IN-GRN", 3).await;
        let err = db.inventory().adjust_stock(&sku, 0, "noop", "clerk").await.unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::MustBeNonZero { .. })
        ));
    }

    #[tokio::test]
    async fn test_adjustment_and_ledger_stay_in_range() {
        let db = test_db().await;
        let sku = seed_sku(&db, "TST-IN-PNK", 3).await;

        let err = db
            .inventory()
            .adjust_stock(&sku, MAX_LINE_QUANTITY + 1, "count", "clerk")
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::OutOfRange { field, .. }) if field == "quantity_change"
        ));
        assert!(db.inventory().adjust_stock(&sku, i64::MIN, "count", "clerk").await.is_err());

        let huge = NewStockMovement::new(&sku, MovementType::Restock, i64::MAX).performed_by("clerk");
        let err = db.inventory().apply_movement(huge).await.unwrap_err();
        assert!(matches!(err.as_validation(), Some(ValidationError::OutOfRange { .. })));

        let check = db.inventory().verify_ledger(&sku).await.unwrap();
        assert_eq!(check.cached, 3);
        assert!(check.is_consistent());
    }

    #[tokio::test]
    async fn test_unknown_sku_is_not_found() {
        let db = test_db().await;
        let err = db.inventory().adjust_stock("NOPE", 1, "count", "clerk").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_history_newest_first_and_low_stock() {
        let db = test_db().await;
        let sku = seed_sku(&db, "TST-IN-YEL", 10).await;
        db.inventory().adjust_stock(&sku, -6, "breakage", "clerk").await.unwrap();

        let history = db.inventory().history(&sku, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].quantity_change, -6);
        assert_eq!(history[0].reference_id.as_deref(), Some("breakage"));

        let low = db.inventory().low_stock().await.unwrap();
        assert!(low.iter().any(|row| row.sku == sku && row.is_low_stock()));

        db.inventory().set_safety_stock(&sku, 2).await.unwrap();
        let low = db.inventory().low_stock().await.unwrap();
        assert!(!low.iter().any(|row| row.sku == sku));
    }
}
