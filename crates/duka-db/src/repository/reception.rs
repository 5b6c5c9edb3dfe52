//! # Reception Repository
//!
//! Goods received against purchase order lines.
//!
//! ```text
//! record_reception(item, received, decayed, by)
//!      │
//!      ├── lock PO header (via item)      CANCELLED → rejected
//!      ├── prior = Σ(received + decayed) of the line's receptions
//!      ├── check_reception(ordered, prior, received, decayed)
//!      ├── INSERT stock_receptions
//!      ├── ledger RESTOCK +received       (decayed is a separate count,
//!      │                                   never posted to stock)
//!      └── recompute PO status            RECEIVED_PARTIAL / RECEIVED_FULL
//! ```

use chrono::Utc;
use duka_core::purchasing::{
    check_reception, quantity_remained_unreceived, LineReceptionStatus, PurchaseOrderItem,
    StockReception,
};
use duka_core::validation::validate_actor;
use duka_core::{MovementType, NewStockMovement, ValidationError};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::purchasing::{derived_status, lock_order, set_status};
use super::{ledger, new_id};
use crate::error::{DbError, DbResult};

/// Repository for stock receptions.
#[derive(Debug, Clone)]
pub struct ReceptionRepository {
    pool: SqlitePool,
}

impl ReceptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReceptionRepository { pool }
    }

    /// Books a delivery against a PO line and restocks the received units.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown line
    /// - Validation: all-zero record, decay above received, over-ordering
    ///   (with the excess), cancelled purchase order
    pub async fn record_reception(
        &self,
        purchase_order_item_id: &str,
        quantity_received: i64,
        decayed_products: i64,
        received_by: &str,
    ) -> DbResult<StockReception> {
        validate_actor("received_by", received_by)?;

        let mut tx = self.pool.begin().await?;
        let item = lock_line(&mut tx, purchase_order_item_id).await?;

        let prior = accounted_excluding(&mut tx, &item.id, None).await?;
        check_reception(item.quantity_ordered, prior, quantity_received, decayed_products)?;

        let reception = StockReception {
            id: new_id(),
            purchase_order_item_id: item.id.clone(),
            quantity_received,
            decayed_products,
            received_by: received_by.to_string(),
            reception_date: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO stock_receptions (
                id, purchase_order_item_id, quantity_received,
                decayed_products, received_by, reception_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&reception.id)
        .bind(&reception.purchase_order_item_id)
        .bind(reception.quantity_received)
        .bind(reception.decayed_products)
        .bind(&reception.received_by)
        .bind(reception.reception_date)
        .execute(&mut *tx)
        .await?;

        if quantity_received > 0 {
            let movement = NewStockMovement::new(&item.sku, MovementType::Restock, quantity_received)
                .unit_cost(item.unit_cost())
                .reference(reception.ledger_reference())
                .performed_by(received_by);
            ledger::apply_movement(&mut tx, &movement).await?;
        }

        refresh_po_status(&mut tx, &item.purchase_order_id).await?;
        tx.commit().await?;

        info!(
            reception_id = %reception.id,
            sku = %item.sku,
            received = quantity_received,
            decayed = decayed_products,
            accounted = prior + reception.accounted(),
            ordered = item.quantity_ordered,
            "Stock reception recorded"
        );
        Ok(reception)
    }

    /// Corrects a reception and posts the difference in received units.
    pub async fn update_reception(
        &self,
        reception_id: &str,
        quantity_received: i64,
        decayed_products: i64,
    ) -> DbResult<StockReception> {
        let mut tx = self.pool.begin().await?;
        lock_by_reception(&mut tx, reception_id).await?;

        let existing = load_reception(&mut tx, reception_id).await?;
        let item = lock_line(&mut tx, &existing.purchase_order_item_id).await?;

        let prior = accounted_excluding(&mut tx, &item.id, Some(reception_id)).await?;
        check_reception(item.quantity_ordered, prior, quantity_received, decayed_products)?;

        let updated = sqlx::query_as::<_, StockReception>(
            r#"
            UPDATE stock_receptions
            SET quantity_received = ?2, decayed_products = ?3
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(reception_id)
        .bind(quantity_received)
        .bind(decayed_products)
        .fetch_one(&mut *tx)
        .await?;

        let delta = quantity_received - existing.quantity_received;
        if delta != 0 {
            let movement_type = if delta > 0 {
                MovementType::Restock
            } else {
                MovementType::Adjust
            };
            let movement = NewStockMovement::new(&item.sku, movement_type, delta)
                .unit_cost(item.unit_cost())
                .reference(updated.ledger_reference())
                .performed_by(&existing.received_by);
            ledger::apply_movement(&mut tx, &movement).await?;
        }

        refresh_po_status(&mut tx, &item.purchase_order_id).await?;
        tx.commit().await?;

        info!(reception_id, delta, decayed = decayed_products, "Stock reception corrected");
        Ok(updated)
    }

    pub async fn get(&self, reception_id: &str) -> DbResult<StockReception> {
        let mut conn = self.pool.acquire().await?;
        load_reception(&mut conn, reception_id).await
    }

    /// Receptions of one line, oldest first.
    pub async fn for_line(&self, purchase_order_item_id: &str) -> DbResult<Vec<StockReception>> {
        let rows = sqlx::query_as::<_, StockReception>(
            "SELECT * FROM stock_receptions WHERE purchase_order_item_id = ?1 ORDER BY rowid",
        )
        .bind(purchase_order_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ordered, received, decayed, for-sale and still-expected figures for
    /// a line.
    pub async fn line_status(&self, purchase_order_item_id: &str) -> DbResult<LineReceptionStatus> {
        let item = sqlx::query_as::<_, PurchaseOrderItem>(
            "SELECT * FROM purchase_order_items WHERE id = ?1",
        )
        .bind(purchase_order_item_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("PurchaseOrderItem", purchase_order_item_id))?;

        let receptions = self.for_line(purchase_order_item_id).await?;
        let total_received: i64 = receptions.iter().map(|r| r.quantity_received).sum();
        let total_decayed: i64 = receptions.iter().map(|r| r.decayed_products).sum();
        let total_remained_for_sale: i64 = receptions
            .iter()
            .map(StockReception::quantity_remained_for_sale)
            .sum();

        Ok(LineReceptionStatus {
            purchase_order_item_id: item.id,
            sku: item.sku,
            quantity_ordered: item.quantity_ordered,
            total_received,
            total_decayed,
            total_remained_for_sale,
            quantity_remained_unreceived: quantity_remained_unreceived(
                item.quantity_ordered,
                total_received + total_decayed,
            ),
        })
    }
}

/// Locks the line's purchase order and returns the line.
///
/// The lock is a write issued before any read, so the transaction never
/// holds a snapshot older than the lock.
async fn lock_line(conn: &mut SqliteConnection, item_id: &str) -> DbResult<PurchaseOrderItem> {
    let touched = sqlx::query(
        r#"
        UPDATE purchase_orders SET updated_at = updated_at
        WHERE id = (SELECT purchase_order_id FROM purchase_order_items WHERE id = ?1)
        "#,
    )
    .bind(item_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if touched == 0 {
        return Err(DbError::not_found("PurchaseOrderItem", item_id));
    }

    let item = sqlx::query_as::<_, PurchaseOrderItem>("SELECT * FROM purchase_order_items WHERE id = ?1")
        .bind(item_id)
        .fetch_one(&mut *conn)
        .await?;

    let header = lock_order(conn, &item.purchase_order_id).await?;
    if !header.status.accepts_receptions() {
        return Err(ValidationError::NotAllowed {
            field: "purchase_order".to_string(),
            reason: format!("purchase order {} is {}", header.po_number, header.status),
        }
        .into());
    }
    Ok(item)
}

/// Locks the purchase order a reception belongs to.
async fn lock_by_reception(conn: &mut SqliteConnection, reception_id: &str) -> DbResult<()> {
    let touched = sqlx::query(
        r#"
        UPDATE purchase_orders SET updated_at = updated_at
        WHERE id = (
            SELECT i.purchase_order_id FROM purchase_order_items i
            JOIN stock_receptions r ON r.purchase_order_item_id = i.id
            WHERE r.id = ?1
        )
        "#,
    )
    .bind(reception_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if touched == 0 {
        return Err(DbError::not_found("StockReception", reception_id));
    }
    Ok(())
}

async fn load_reception(conn: &mut SqliteConnection, reception_id: &str) -> DbResult<StockReception> {
    sqlx::query_as::<_, StockReception>("SELECT * FROM stock_receptions WHERE id = ?1")
        .bind(reception_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("StockReception", reception_id))
}

async fn accounted_excluding(
    conn: &mut SqliteConnection,
    item_id: &str,
    excluded: Option<&str>,
) -> DbResult<i64> {
    let accounted: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(quantity_received + decayed_products), 0)
        FROM stock_receptions
        WHERE purchase_order_item_id = ?1 AND (?2 IS NULL OR id <> ?2)
        "#,
    )
    .bind(item_id)
    .bind(excluded)
    .fetch_one(&mut *conn)
    .await?;
    Ok(accounted)
}

async fn refresh_po_status(conn: &mut SqliteConnection, purchase_order_id: &str) -> DbResult<()> {
    let current = lock_order(conn, purchase_order_id).await?.status;
    let status = derived_status(conn, purchase_order_id, current).await?;
    if status != current {
        set_status(conn, purchase_order_id, status).await?;
    }
    Ok(())
}
