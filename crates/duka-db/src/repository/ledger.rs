//! # Inventory Ledger
//!
//! The only code that writes `inventory.quantity_in_stock`.
//!
//! ```text
//! apply_movement(conn, movement)            (caller owns the transaction)
//!      │
//!      ├── 1. touch inventory row  → write lock, NotFound if absent
//!      ├── 2. read quantity_in_stock
//!      ├── 3. qty + change < 0?    → InsufficientStock, nothing written
//!      │      (overflow            → OutOfRange)
//!      ├── 4. INSERT stock_movements
//!      └── 5. UPDATE inventory (qty, updated_at, last_restock_date)
//! ```
//!
//! Steps 4 and 5 commit or roll back together with whatever else the
//! caller's transaction does.

use chrono::Utc;
use duka_core::{CoreError, NewStockMovement, StockMovement, ValidationError};
use sqlx::SqliteConnection;
use tracing::debug;

use super::{lock_rows, new_id};
use crate::error::{DbError, DbResult};

/// Locks an inventory row and returns its current quantity.
pub(crate) async fn lock_inventory(conn: &mut SqliteConnection, sku: &str) -> DbResult<i64> {
    if !lock_rows(conn, "inventory", "sku", sku).await? {
        return Err(DbError::not_found("Inventory", sku));
    }

    let quantity: i64 = sqlx::query_scalar("SELECT quantity_in_stock FROM inventory WHERE sku = ?1")
        .bind(sku)
        .fetch_one(&mut *conn)
        .await?;

    Ok(quantity)
}

/// Applies one movement and returns it with the new stock level.
pub(crate) async fn apply_movement(
    conn: &mut SqliteConnection,
    movement: &NewStockMovement,
) -> DbResult<(StockMovement, i64)> {
    if movement.quantity_change == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "quantity_change".to_string(),
        }
        .into());
    }

    let available = lock_inventory(conn, &movement.sku).await?;
    let new_quantity = available
        .checked_add(movement.quantity_change)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "quantity_change".to_string(),
            min: -available,
            max: i64::MAX - available,
        })?;

    if new_quantity < 0 {
        return Err(CoreError::InsufficientStock {
            sku: movement.sku.clone(),
            available,
            requested: -movement.quantity_change,
        }
        .into());
    }

    let now = Utc::now();
    let record = StockMovement {
        id: new_id(),
        sku: movement.sku.clone(),
        movement_type: movement.movement_type,
        quantity_change: movement.quantity_change,
        unit_cost_cents: movement.unit_cost_cents,
        reference_id: movement.reference_id.clone(),
        performed_by: movement.performed_by.clone(),
        timestamp: now,
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, sku, movement_type, quantity_change,
            unit_cost_cents, reference_id, performed_by, timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&record.id)
    .bind(&record.sku)
    .bind(record.movement_type)
    .bind(record.quantity_change)
    .bind(record.unit_cost_cents)
    .bind(&record.reference_id)
    .bind(&record.performed_by)
    .bind(record.timestamp)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE inventory SET
            quantity_in_stock = ?2,
            updated_at = ?3,
            last_restock_date = CASE WHEN ?4 THEN ?3 ELSE last_restock_date END
        WHERE sku = ?1
        "#,
    )
    .bind(&record.sku)
    .bind(new_quantity)
    .bind(now)
    .bind(movement.is_restock_receipt())
    .execute(&mut *conn)
    .await?;

    debug!(
        sku = %record.sku,
        movement_type = %record.movement_type,
        change = record.quantity_change,
        new_quantity,
        reference = ?record.reference_id,
        "Stock movement applied"
    );

    Ok((record, new_quantity))
}

/// True when a movement with this reference already exists for the SKU.
pub(crate) async fn movement_exists(
    conn: &mut SqliteConnection,
    sku: &str,
    reference_id: &str,
) -> DbResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM stock_movements WHERE sku = ?1 AND reference_id = ?2",
    )
    .bind(sku)
    .bind(reference_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}
