//! # Purchase Order Repository
//!
//! PO headers and lines, sequential numbering, and diff-based line updates.
//!
//! ## Numbering Under Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Creator A                              Creator B                       │
//! │  BEGIN                                  BEGIN                           │
//! │  upsert number_series 'PO-2026'  ◄─ lock   upsert 'PO-2026' … waits    │
//! │  highest = #ORD-2026-0007                                               │
//! │  INSERT #ORD-2026-0008                                                  │
//! │  COMMIT ──────────────────────────────► lock granted                   │
//! │                                         highest = #ORD-2026-0008        │
//! │                                         INSERT #ORD-2026-0009           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Line Updates
//! Submitted lines are matched to stored lines by id: unmatched submissions
//! are created, matched ones updated in place, stored lines missing from the
//! submission deleted. Lines carrying receptions are never deleted and never
//! shrunk below what has been accounted.

use chrono::{Datelike, Utc};
use duka_core::diff::diff_by_id;
use duka_core::purchasing::{
    next_po_number, order_total, po_number_prefix, receiving_status, validate_po_dates, validate_po_lines,
    NewPurchaseOrder, PoStatus, PurchaseOrder, PurchaseOrderItem, PurchaseOrderLine,
    PurchaseOrderUpdate,
};
use duka_core::validation::validate_actor;
use duka_core::{CoreError, ValidationError};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{lock_rows, lock_series, new_id};
use crate::error::{DbError, DbResult};

/// Repository for purchase order operations.
#[derive(Debug, Clone)]
pub struct PurchaseOrderRepository {
    pool: SqlitePool,
}

impl PurchaseOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseOrderRepository { pool }
    }

    /// Creates a DRAFT purchase order with the next number of the year.
    ///
    /// ## Errors
    /// - Validation: empty items, duplicate SKUs, bad quantities/costs,
    ///   delivery date before PO date
    /// - `NotFound` for a line SKU without an inventory row
    pub async fn create_order(&self, order: NewPurchaseOrder) -> DbResult<PurchaseOrder> {
        if order.supplier_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "supplier_id".to_string(),
            }
            .into());
        }
        validate_actor("created_by", &order.created_by)?;
        validate_po_lines(&order.items)?;
        let total = order_total(&order.items)?;

        let now = Utc::now();
        let po_date = order.po_date.unwrap_or_else(|| now.date_naive());
        validate_po_dates(po_date, order.expected_delivery_date)?;

        let year = po_date.year();
        let mut tx = self.pool.begin().await?;

        lock_series(&mut tx, &format!("PO-{}", year)).await?;
        let highest = highest_po_number(&mut tx, year).await?;
        let po_number = next_po_number(year, highest.as_deref());

        for line in &order.items {
            ensure_sku(&mut tx, &line.sku).await?;
        }

        let header = PurchaseOrder {
            id: new_id(),
            po_number,
            supplier_id: order.supplier_id.trim().to_string(),
            po_date,
            expected_delivery_date: order.expected_delivery_date,
            status: PoStatus::Draft,
            order_total_cents: total.cents(),
            created_by: order.created_by,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, po_number, supplier_id, po_date, expected_delivery_date,
                status, order_total_cents, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&header.id)
        .bind(&header.po_number)
        .bind(&header.supplier_id)
        .bind(header.po_date)
        .bind(header.expected_delivery_date)
        .bind(header.status)
        .bind(header.order_total_cents)
        .bind(&header.created_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &order.items {
            insert_line(&mut tx, &header.id, line).await?;
        }

        tx.commit().await?;

        info!(
            po_number = %header.po_number,
            supplier = %header.supplier_id,
            lines = order.items.len(),
            total = header.order_total_cents,
            "Purchase order created"
        );
        Ok(header)
    }

    /// Replaces the PO's lines by diff and recomputes its total.
    pub async fn update_order(
        &self,
        purchase_order_id: &str,
        update: PurchaseOrderUpdate,
    ) -> DbResult<PurchaseOrder> {
        validate_po_lines(&update.items)?;
        // The submission replaces the whole line set.
        let total = order_total(&update.items)?.cents();

        let mut tx = self.pool.begin().await?;
        let header = lock_order(&mut tx, purchase_order_id).await?;

        if header.status == PoStatus::Cancelled {
            return Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                reason: format!("purchase order {} is cancelled", header.po_number),
            }
            .into());
        }
        validate_po_dates(header.po_date, update.expected_delivery_date)?;

        let stored = load_items(&mut tx, purchase_order_id).await?;
        let stored_ids: Vec<String> = stored.iter().map(|i| i.id.clone()).collect();
        let diff = diff_by_id(&stored_ids, &update.items, "items")?;

        for id in &diff.delete {
            let accounted = accounted_for_line(&mut tx, id).await?;
            if accounted > 0 {
                return Err(ValidationError::NotAllowed {
                    field: "items".to_string(),
                    reason: format!("line {} has receptions and cannot be removed", id),
                }
                .into());
            }
            sqlx::query("DELETE FROM purchase_order_items WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for (id, line) in &diff.update {
            let current = stored
                .iter()
                .find(|i| &i.id == id)
                .ok_or_else(|| DbError::not_found("PurchaseOrderItem", id.as_str()))?;
            let accounted = accounted_for_line(&mut tx, id).await?;

            if accounted > 0 && current.sku != line.sku {
                return Err(ValidationError::NotAllowed {
                    field: "items.sku".to_string(),
                    reason: format!("line {} has receptions; its SKU cannot change", id),
                }
                .into());
            }
            if line.quantity_ordered < accounted {
                return Err(ValidationError::OutOfRange {
                    field: "items.quantity_ordered".to_string(),
                    min: accounted,
                    max: i64::MAX,
                }
                .into());
            }
            if current.sku != line.sku {
                ensure_sku(&mut tx, &line.sku).await?;
            }

            sqlx::query(
                r#"
                UPDATE purchase_order_items
                SET sku = ?2, quantity_ordered = ?3, unit_cost_cents = ?4
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(&line.sku)
            .bind(line.quantity_ordered)
            .bind(line.unit_cost_cents)
            .execute(&mut *tx)
            .await?;
        }

        for line in &diff.create {
            ensure_sku(&mut tx, &line.sku).await?;
            insert_line(&mut tx, purchase_order_id, line).await?;
        }

        let status = derived_status(&mut tx, purchase_order_id, header.status).await?;

        let updated = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            UPDATE purchase_orders SET
                expected_delivery_date = ?2,
                order_total_cents = ?3,
                status = ?4,
                updated_at = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(purchase_order_id)
        .bind(update.expected_delivery_date)
        .bind(total)
        .bind(status)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            po_number = %updated.po_number,
            created = diff.create.len(),
            updated = diff.update.len(),
            deleted = diff.delete.len(),
            total,
            "Purchase order updated"
        );
        Ok(updated)
    }

    pub async fn get_order(&self, purchase_order_id: &str) -> DbResult<PurchaseOrder> {
        sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = ?1")
            .bind(purchase_order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseOrder", purchase_order_id))
    }

    pub async fn get_by_number(&self, po_number: &str) -> DbResult<PurchaseOrder> {
        sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE po_number = ?1")
            .bind(po_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseOrder", po_number))
    }

    pub async fn items(&self, purchase_order_id: &str) -> DbResult<Vec<PurchaseOrderItem>> {
        let mut conn = self.pool.acquire().await?;
        load_items(&mut conn, purchase_order_id).await
    }

    /// DRAFT → SENT.
    pub async fn mark_sent(&self, purchase_order_id: &str) -> DbResult<PurchaseOrder> {
        self.transition(purchase_order_id, PoStatus::Sent, |from| from == PoStatus::Draft)
            .await
    }

    /// Cancels a PO that has no receptions yet.
    pub async fn cancel_order(&self, purchase_order_id: &str) -> DbResult<PurchaseOrder> {
        let mut tx = self.pool.begin().await?;
        let header = lock_order(&mut tx, purchase_order_id).await?;

        if header.status == PoStatus::Cancelled {
            return Err(
                CoreError::invalid_transition("PurchaseOrder", &header.id, header.status, PoStatus::Cancelled)
                    .into(),
            );
        }

        let received: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stock_receptions r
            JOIN purchase_order_items i ON i.id = r.purchase_order_item_id
            WHERE i.purchase_order_id = ?1
            "#,
        )
        .bind(purchase_order_id)
        .fetch_one(&mut *tx)
        .await?;

        if received > 0 {
            return Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                reason: format!("purchase order {} already has receptions", header.po_number),
            }
            .into());
        }

        let cancelled = set_status(&mut tx, purchase_order_id, PoStatus::Cancelled).await?;
        tx.commit().await?;

        info!(po_number = %cancelled.po_number, "Purchase order cancelled");
        Ok(cancelled)
    }

    async fn transition(
        &self,
        purchase_order_id: &str,
        to: PoStatus,
        allowed: impl Fn(PoStatus) -> bool,
    ) -> DbResult<PurchaseOrder> {
        let mut tx = self.pool.begin().await?;
        let header = lock_order(&mut tx, purchase_order_id).await?;

        if !allowed(header.status) {
            return Err(CoreError::invalid_transition("PurchaseOrder", &header.id, header.status, to).into());
        }

        let updated = set_status(&mut tx, purchase_order_id, to).await?;
        tx.commit().await?;

        debug!(po_number = %updated.po_number, status = %to, "Purchase order status changed");
        Ok(updated)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Locks the PO header and returns it.
pub(crate) async fn lock_order(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
) -> DbResult<PurchaseOrder> {
    if !lock_rows(conn, "purchase_orders", "id", purchase_order_id).await? {
        return Err(DbError::not_found("PurchaseOrder", purchase_order_id));
    }
    let header = sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = ?1")
        .bind(purchase_order_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(header)
}

/// `Σ(received + decayed)` across every reception of a line.
pub(crate) async fn accounted_for_line(conn: &mut SqliteConnection, item_id: &str) -> DbResult<i64> {
    let accounted: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(quantity_received + decayed_products), 0)
        FROM stock_receptions WHERE purchase_order_item_id = ?1
        "#,
    )
    .bind(item_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(accounted)
}

/// Status implied by the lines' reception totals. A DRAFT or SENT order
/// with nothing received keeps its status.
pub(crate) async fn derived_status(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
    current: PoStatus,
) -> DbResult<PoStatus> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT i.quantity_ordered,
               COALESCE(SUM(r.quantity_received + r.decayed_products), 0)
        FROM purchase_order_items i
        LEFT JOIN stock_receptions r ON r.purchase_order_item_id = i.id
        WHERE i.purchase_order_id = ?1
        GROUP BY i.id
        "#,
    )
    .bind(purchase_order_id)
    .fetch_all(&mut *conn)
    .await?;

    let derived = receiving_status(rows);
    Ok(match (current, derived) {
        (PoStatus::Cancelled, _) => PoStatus::Cancelled,
        (PoStatus::Draft, PoStatus::Sent) => PoStatus::Draft,
        (_, derived) => derived,
    })
}

pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
    status: PoStatus,
) -> DbResult<PurchaseOrder> {
    let updated = sqlx::query_as::<_, PurchaseOrder>(
        "UPDATE purchase_orders SET status = ?2, updated_at = ?3 WHERE id = ?1 RETURNING *",
    )
    .bind(purchase_order_id)
    .bind(status)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(updated)
}

async fn highest_po_number(conn: &mut SqliteConnection, year: i32) -> DbResult<Option<String>> {
    let pattern = format!("{}%", po_number_prefix(year));
    let highest: Option<String> = sqlx::query_scalar(
        r#"
        SELECT po_number FROM purchase_orders
        WHERE po_number LIKE ?1
        ORDER BY LENGTH(po_number) DESC, po_number DESC
        LIMIT 1
        "#,
    )
    .bind(pattern)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(highest)
}

async fn ensure_sku(conn: &mut SqliteConnection, sku: &str) -> DbResult<()> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory WHERE sku = ?1")
        .bind(sku)
        .fetch_one(&mut *conn)
        .await?;
    if exists == 0 {
        return Err(DbError::not_found("Inventory", sku));
    }
    Ok(())
}

async fn insert_line(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
    line: &PurchaseOrderLine,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchase_order_items (
            id, purchase_order_id, sku, quantity_ordered, unit_cost_cents, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(new_id())
    .bind(purchase_order_id)
    .bind(&line.sku)
    .bind(line.quantity_ordered)
    .bind(line.unit_cost_cents)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn load_items(
    conn: &mut SqliteConnection,
    purchase_order_id: &str,
) -> DbResult<Vec<PurchaseOrderItem>> {
    let items = sqlx::query_as::<_, PurchaseOrderItem>(
        "SELECT * FROM purchase_order_items WHERE purchase_order_id = ?1 ORDER BY rowid",
    )
    .bind(purchase_order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_db, new_po, seed_sku, test_db};
    use duka_core::Money;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_numbering_starts_at_one_and_increments() {
        let db = test_db().await;
        let sku = seed_sku(&db, "PO-NUM-RED", 0).await;
        let year = Utc::now().year();

        let first = db.purchasing().create_order(new_po(&[(&sku, 5, 100)])).await.unwrap();
        let second = db.purchasing().create_order(new_po(&[(&sku, 5, 100)])).await.unwrap();

        assert_eq!(first.po_number, format!("#ORD-{}-0001", year));
        assert_eq!(second.po_number, format!("#ORD-{}-0002", year));
        assert_eq!(first.status, PoStatus::Draft);
        assert_eq!(first.order_total_cents, 500);
    }

    #[tokio::test]
    async fn test_concurrent_creators_get_distinct_sequential_numbers() {
        let (db, _guard) = file_db().await;
        let sku = seed_sku(&db, "PO-CON-RED", 0).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let sku = sku.clone();
            handles.push(tokio::spawn(async move {
                db.purchasing().create_order(new_po(&[(&sku, 1, 100)])).await
            }));
        }

        let mut numbers = HashSet::new();
        for handle in handles {
            let po = handle.await.unwrap().unwrap();
            numbers.insert(po.po_number);
        }

        let year = Utc::now().year();
        let expected: HashSet<String> = (1..=8).map(|n| format!("#ORD-{}-{:04}", year, n)).collect();
        assert_eq!(numbers, expected);
    }

    #[tokio::test]
    async fn test_update_recomputes_total_after_deletes() {
        let db = test_db().await;
        let a = seed_sku(&db, "PO-UPD-AAA", 0).await;
        let b = seed_sku(&db, "PO-UPD-BBB", 0).await;
        let c = seed_sku(&db, "PO-UPD-CCC", 0).await;

        let po = db
            .purchasing()
            .create_order(new_po(&[(&a, 10, 1_000), (&b, 5, 2_000)]))
            .await
            .unwrap();
        assert_eq!(po.order_total_cents, 20_000);

        let items = db.purchasing().items(&po.id).await.unwrap();
        let line_a = items.iter().find(|i| i.sku == a).unwrap();

        let updated = db
            .purchasing()
            .update_order(
                &po.id,
                PurchaseOrderUpdate {
                    expected_delivery_date: None,
                    items: vec![
                        PurchaseOrderLine::new(&a, 4, Money::from_cents(1_000)).with_id(&line_a.id),
                        PurchaseOrderLine::new(&c, 1, Money::from_cents(500)),
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.order_total_cents, 4_500);

        let items = db.purchasing().items(&po.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.id == line_a.id && i.quantity_ordered == 4));
        assert!(!items.iter().any(|i| i.sku == b));
    }

    #[tokio::test]
    async fn test_update_keeps_lines_with_receptions() {
        let db = test_db().await;
        let a = seed_sku(&db, "PO-REC-AAA", 0).await;
        let po = db.purchasing().create_order(new_po(&[(&a, 10, 100)])).await.unwrap();
        let line = db.purchasing().items(&po.id).await.unwrap().remove(0);

        let reception = db.receptions().record_reception(&line.id, 6, 0, "store").await.unwrap();

        let err = db
            .purchasing()
            .update_order(
                &po.id,
                PurchaseOrderUpdate {
                    expected_delivery_date: None,
                    items: vec![PurchaseOrderLine::new(&a, 3, Money::from_cents(100)).with_id(&line.id)],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_validation(), Some(ValidationError::OutOfRange { min: 6, .. })));

        // Raising the quantity keeps the same line and its reception.
        db.purchasing()
            .update_order(
                &po.id,
                PurchaseOrderUpdate {
                    expected_delivery_date: None,
                    items: vec![PurchaseOrderLine::new(&a, 20, Money::from_cents(100)).with_id(&line.id)],
                },
            )
            .await
            .unwrap();

        let status = db.receptions().line_status(&line.id).await.unwrap();
        assert_eq!(status.quantity_ordered, 20);
        assert_eq!(status.total_received, 6);
        assert_eq!(db.receptions().get(&reception.id).await.unwrap().purchase_order_item_id, line.id);

        let cleared = db
            .purchasing()
            .update_order(
                &po.id,
                PurchaseOrderUpdate {
                    expected_delivery_date: None,
                    items: vec![PurchaseOrderLine::new(&a, 1, Money::from_cents(1))],
                },
            )
            .await;
        assert!(matches!(
            cleared.unwrap_err().as_validation(),
            Some(ValidationError::NotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let db = test_db().await;
        let a = seed_sku(&db, "PO-VAL-AAA", 0).await;

        let empty = db.purchasing().create_order(new_po(&[])).await.unwrap_err();
        assert!(matches!(empty.as_validation(), Some(ValidationError::Empty { .. })));

        let mut backwards = new_po(&[(&a, 1, 100)]);
        backwards.po_date = chrono::NaiveDate::from_ymd_opt(2026, 3, 10);
        backwards.expected_delivery_date = chrono::NaiveDate::from_ymd_opt(2026, 3, 9);
        let err = db.purchasing().create_order(backwards).await.unwrap_err();
        assert!(matches!(err.as_validation(), Some(ValidationError::DateOrder { .. })));

        let unknown = db.purchasing().create_order(new_po(&[("NOPE-1", 1, 1)])).await.unwrap_err();
        assert!(matches!(unknown, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = test_db().await;
        let a = seed_sku(&db, "PO-STA-AAA", 0).await;
        let po = db.purchasing().create_order(new_po(&[(&a, 2, 100)])).await.unwrap();

        let sent = db.purchasing().mark_sent(&po.id).await.unwrap();
        assert_eq!(sent.status, PoStatus::Sent);
        assert!(db.purchasing().mark_sent(&po.id).await.is_err());

        let cancelled = db.purchasing().cancel_order(&po.id).await.unwrap();
        assert_eq!(cancelled.status, PoStatus::Cancelled);
    }
}
