//! # Shipment Repository
//!
//! Shipment requests for paid orders with physical lines, and the
//! status progression of each shipment.
//!
//! ```text
//! PENDING ──► PACKING ──► DISPATCHED ──► DELIVERED ──► request fulfilled,
//!    │           │             │                         order FULFILLED
//!    └───────────┴─────────────┴──► FAILED
//! ```

use chrono::Utc;
use duka_core::fulfillment::{
    OrderStatus, Shipment, ShipmentLineItem, ShipmentPlan, ShipmentRequest, ShipmentStatus,
};
use duka_core::{CoreError, ValidationError};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::new_id;
use super::order::{lock_order, physical_items, set_order_status};
use crate::error::{DbError, DbResult};

/// Repository for shipment requests and shipments.
#[derive(Debug, Clone)]
pub struct ShipmentRepository {
    pool: SqlitePool,
    default_method: String,
}

impl ShipmentRepository {
    pub fn new(pool: SqlitePool, default_method: String) -> Self {
        ShipmentRepository { pool, default_method }
    }

    /// Creates the order's shipment request, or returns the existing one.
    ///
    /// A new request gets one PENDING shipment carrying every physical line.
    pub async fn request_shipment(&self, order_id: &str) -> DbResult<ShipmentPlan> {
        let mut tx = self.pool.begin().await?;
        let order = lock_order(&mut tx, order_id).await?;

        if let Some(plan) = load_plan(&mut tx, order_id).await? {
            tx.commit().await?;
            return Ok(plan);
        }

        if order.status == OrderStatus::Cancelled {
            return Err(ValidationError::NotAllowed {
                field: "order".to_string(),
                reason: format!("order {} is cancelled", order.order_number),
            }
            .into());
        }

        let lines = physical_items(&mut tx, order_id).await?;
        if lines.is_empty() {
            return Err(ValidationError::Empty {
                field: "physical_items".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let request = ShipmentRequest {
            id: new_id(),
            order_id: order_id.to_string(),
            requested_at: now,
            is_fulfilled: false,
        };
        sqlx::query(
            "INSERT INTO shipment_requests (id, order_id, requested_at, is_fulfilled) VALUES (?1, ?2, ?3, 0)",
        )
        .bind(&request.id)
        .bind(&request.order_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let shipment = Shipment {
            id: new_id(),
            request_id: request.id.clone(),
            shipping_method: self.default_method.clone(),
            tracking_number: None,
            status: ShipmentStatus::Pending,
            dispatched_at: None,
            delivered_at: None,
            created_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO shipments (id, request_id, shipping_method, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&shipment.id)
        .bind(&shipment.request_id)
        .bind(&shipment.shipping_method)
        .bind(shipment.status)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut line_items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = ShipmentLineItem {
                id: new_id(),
                shipment_id: shipment.id.clone(),
                order_item_id: line.id.clone(),
                quantity: line.quantity,
            };
            sqlx::query(
                "INSERT INTO shipment_line_items (id, shipment_id, order_item_id, quantity) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&item.id)
            .bind(&item.shipment_id)
            .bind(&item.order_item_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
            line_items.push(item);
        }

        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            request_id = %request.id,
            lines = line_items.len(),
            method = %shipment.shipping_method,
            "Shipment requested"
        );
        Ok(ShipmentPlan {
            request,
            shipments: vec![shipment],
            line_items,
            created: true,
        })
    }

    /// Moves a shipment forward. Delivery of the last open shipment
    /// fulfills the request and the order.
    pub async fn update_status(
        &self,
        shipment_id: &str,
        status: ShipmentStatus,
        tracking_number: Option<&str>,
    ) -> DbResult<Shipment> {
        let mut tx = self.pool.begin().await?;

        // Lock the owning order before reading anything.
        sqlx::query(
            r#"
            UPDATE orders SET updated_at = updated_at
            WHERE id = (
                SELECT r.order_id FROM shipments s
                JOIN shipment_requests r ON r.id = s.request_id
                WHERE s.id = ?1
            )
            "#,
        )
        .bind(shipment_id)
        .execute(&mut *tx)
        .await?;

        let (request_id, order_id): (String, String) = sqlx::query_as(
            r#"
            SELECT r.id, r.order_id FROM shipments s
            JOIN shipment_requests r ON r.id = s.request_id
            WHERE s.id = ?1
            "#,
        )
        .bind(shipment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("Shipment", shipment_id))?;

        let current = sqlx::query_as::<_, Shipment>("SELECT * FROM shipments WHERE id = ?1")
            .bind(shipment_id)
            .fetch_one(&mut *tx)
            .await?;

        if !current.status.can_transition_to(status) {
            return Err(CoreError::invalid_transition("Shipment", shipment_id, current.status, status).into());
        }

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Shipment>(
            r#"
            UPDATE shipments SET
                status = ?2,
                tracking_number = COALESCE(?3, tracking_number),
                dispatched_at = CASE WHEN ?2 = 'DISPATCHED' THEN ?4 ELSE dispatched_at END,
                delivered_at = CASE WHEN ?2 = 'DELIVERED' THEN ?4 ELSE delivered_at END
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(shipment_id)
        .bind(status)
        .bind(tracking_number)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if status == ShipmentStatus::Delivered {
            let open: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM shipments WHERE request_id = ?1 AND status <> 'DELIVERED'",
            )
            .bind(&request_id)
            .fetch_one(&mut *tx)
            .await?;

            if open == 0 {
                sqlx::query("UPDATE shipment_requests SET is_fulfilled = 1 WHERE id = ?1")
                    .bind(&request_id)
                    .execute(&mut *tx)
                    .await?;
                set_order_status(&mut tx, &order_id, OrderStatus::Fulfilled).await?;
            }
        }

        tx.commit().await?;

        info!(shipment_id, status = %status, tracking = ?updated.tracking_number, "Shipment status changed");
        Ok(updated)
    }

    /// The order's request with its shipments, if one was made.
    pub async fn plan_for_order(&self, order_id: &str) -> DbResult<Option<ShipmentPlan>> {
        let mut conn = self.pool.acquire().await?;
        load_plan(&mut conn, order_id).await
    }
}

async fn load_plan(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Option<ShipmentPlan>> {
    let Some(request) =
        sqlx::query_as::<_, ShipmentRequest>("SELECT * FROM shipment_requests WHERE order_id = ?1")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?
    else {
        return Ok(None);
    };

    let shipments = sqlx::query_as::<_, Shipment>(
        "SELECT * FROM shipments WHERE request_id = ?1 ORDER BY rowid",
    )
    .bind(&request.id)
    .fetch_all(&mut *conn)
    .await?;

    let line_items = sqlx::query_as::<_, ShipmentLineItem>(
        r#"
        SELECT l.* FROM shipment_line_items l
        JOIN shipments s ON s.id = l.shipment_id
        WHERE s.request_id = ?1
        ORDER BY l.rowid
        "#,
    )
    .bind(&request.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(ShipmentPlan {
        request,
        shipments,
        line_items,
        created: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_order, seed_sku, test_db};

    #[tokio::test]
    async fn test_request_is_idempotent() {
        let db = test_db().await;
        let a = seed_sku(&db, "SHP-AA-RED", 5).await;
        let b = seed_sku(&db, "SHP-BB-RED", 5).await;
        let order = db
            .orders()
            .create_order(new_order(&[(&a, 1, 100), (&b, 2, 100)], &[]))
            .await
            .unwrap();

        let first = db.shipments().request_shipment(&order.id).await.unwrap();
        assert!(first.created);
        assert_eq!(first.shipments.len(), 1);
        assert_eq!(first.shipments[0].shipping_method, "STANDARD");
        assert_eq!(first.line_items.len(), 2);

        let again = db.shipments().request_shipment(&order.id).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.request.id, first.request.id);
        assert_eq!(again.line_items.len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_fulfills_order() {
        let db = test_db().await;
        let a = seed_sku(&db, "SHP-DL-RED", 5).await;
        let order = db.orders().create_order(new_order(&[(&a, 1, 100)], &[])).await.unwrap();
        let plan = db.shipments().request_shipment(&order.id).await.unwrap();
        let shipment_id = &plan.shipments[0].id;

        let packing = db.shipments().update_status(shipment_id, ShipmentStatus::Packing, None).await.unwrap();
        assert_eq!(packing.status, ShipmentStatus::Packing);

        let dispatched = db
            .shipments()
            .update_status(shipment_id, ShipmentStatus::Dispatched, Some("TRK-001"))
            .await
            .unwrap();
        assert!(dispatched.dispatched_at.is_some());
        assert_eq!(dispatched.tracking_number.as_deref(), Some("TRK-001"));

        let backwards = db
            .shipments()
            .update_status(shipment_id, ShipmentStatus::Packing, None)
            .await
            .unwrap_err();
        assert!(matches!(backwards, DbError::Domain(CoreError::InvalidTransition { .. })));

        db.shipments().update_status(shipment_id, ShipmentStatus::Delivered, None).await.unwrap();

        let plan = db.shipments().plan_for_order(&order.id).await.unwrap().unwrap();
        assert!(plan.request.is_fulfilled);
        assert!(plan.shipments[0].delivered_at.is_some());
        assert_eq!(db.orders().get(&order.id).await.unwrap().status, OrderStatus::Fulfilled);
    }

    #[tokio::test]
    async fn test_digital_only_order_has_nothing_to_ship() {
        let db = test_db().await;
        let product = crate::testing::digital_with_keys(&db, "E-book", &["EB-1"]).await;
        let order = crate::testing::digital_order(&db, &product).await;

        let err = db.shipments().request_shipment(&order.id).await.unwrap_err();
        assert!(matches!(err.as_validation(), Some(ValidationError::Empty { .. })));
    }
}
