//! # Fulfillment Service
//!
//! Everything that happens to an order once its payment is SUCCESS.
//!
//! ```text
//! fulfill_order(order)                       every step safe to repeat
//!      │
//!      ├── 0. SUCCESS payment on file and    else InvalidTransition,
//!      │      order PENDING or PAID?         nothing touched
//!      ├── 1. PENDING → PAID                 skipped when already PAID
//!      ├── 2. license per digital line       returns the key already assigned
//!      ├── 3. shipment request               returns the existing request
//!      ├── 4. stock finalization             SALE -qty per physical line,
//!      │                                     skipped where ORDER-<n> is posted
//!      └── 5. confirmation notice            only on the call that marked PAID
//! ```
//!
//! A failing step is recorded in the [`FulfillmentReport`] and logged with
//! `error!`; the remaining steps still run. Nothing here touches the payment.

use std::sync::Arc;

use duka_core::fulfillment::{FulfillmentReport, Order, OrderStatus};
use duka_core::payment::PaymentStatus;
use duka_core::{CoreError, MovementType, NewStockMovement};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use super::license::LicenseRepository;
use super::order::{digital_items, lock_order, physical_items, set_order_status};
use super::shipment::ShipmentRepository;
use super::ledger;
use crate::error::DbResult;
use crate::notify::Notifier;

/// Post-payment side effects for customer orders.
#[derive(Clone)]
pub struct FulfillmentService {
    pool: SqlitePool,
    licenses: LicenseRepository,
    shipments: ShipmentRepository,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for FulfillmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentService").finish_non_exhaustive()
    }
}

impl FulfillmentService {
    pub fn new(pool: SqlitePool, shipments: ShipmentRepository, notifier: Arc<dyn Notifier>) -> Self {
        FulfillmentService {
            licenses: LicenseRepository::new(pool.clone()),
            pool,
            shipments,
            notifier,
        }
    }

    /// Runs every fulfillment step for a paid order.
    ///
    /// An order without a SUCCESS payment, or one that is no longer PENDING
    /// or PAID, is refused with `InvalidTransition` before any step runs.
    /// Beyond that only a failure to load or mark the order is returned as
    /// `Err`; step failures land in the report.
    pub async fn fulfill_order(&self, order_id: &str) -> DbResult<FulfillmentReport> {
        let mut report = FulfillmentReport::new(order_id);
        let order = self.mark_paid(order_id, &mut report).await?;

        let digital = {
            let mut conn = self.pool.acquire().await?;
            digital_items(&mut conn, order_id).await?
        };
        for line in &digital {
            match self.licenses.assign_license(order_id, &line.digital_product_id).await {
                Ok(license) => report.licenses_assigned.push(license.id),
                Err(e) => {
                    error!(
                        order_number = %order.order_number,
                        digital_product_id = %line.digital_product_id,
                        error = %e,
                        "License assignment failed"
                    );
                    report
                        .failures
                        .push(format!("license for {}: {}", line.digital_product_id, e));
                }
            }
        }

        if !order.is_digital {
            match self.shipments.request_shipment(order_id).await {
                Ok(plan) => report.shipment_request_id = Some(plan.request.id),
                Err(e) => {
                    error!(order_number = %order.order_number, error = %e, "Shipment request failed");
                    report.failures.push(format!("shipment request: {}", e));
                }
            }

            match self.finalize_stock(&order).await {
                Ok(()) => report.stock_finalized = true,
                Err(e) => {
                    error!(order_number = %order.order_number, error = %e, "Stock finalization failed");
                    report.failures.push(format!("stock finalization: {}", e));
                }
            }
        }

        if report.order_marked_paid {
            let message = format!(
                "Payment of {} for order {} received. Thank you for shopping with us.",
                order.order_total(),
                order.order_number
            );
            report.confirmation_sent = self.notifier.notify(&order.customer_phone, &message).await;
            if !report.confirmation_sent {
                warn!(order_number = %order.order_number, "Confirmation notice not delivered");
            }
        }

        if report.is_complete() {
            info!(
                order_number = %order.order_number,
                licenses = report.licenses_assigned.len(),
                shipment = ?report.shipment_request_id,
                "Order fulfilled"
            );
        } else {
            error!(
                order_number = %order.order_number,
                failures = report.failures.len(),
                "Order fulfillment incomplete; operator follow-up required"
            );
        }
        Ok(report)
    }

    async fn mark_paid(&self, order_id: &str, report: &mut FulfillmentReport) -> DbResult<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;

        let settled: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE order_id = ?1 AND status = ?2)",
        )
        .bind(order_id)
        .bind(PaymentStatus::Success)
        .fetch_one(&mut *tx)
        .await?;

        if !settled || !matches!(order.status, OrderStatus::Pending | OrderStatus::Paid) {
            warn!(
                order_number = %order.order_number,
                status = %order.status,
                settled,
                "Fulfillment refused"
            );
            return Err(CoreError::invalid_transition("Order", order_id, order.status, OrderStatus::Paid).into());
        }

        if order.status == OrderStatus::Pending {
            order = set_order_status(&mut tx, order_id, OrderStatus::Paid).await?;
            report.order_marked_paid = true;
        }
        tx.commit().await?;
        Ok(order)
    }

    /// Posts the order's SALE movements, all or none.
    async fn finalize_stock(&self, order: &Order) -> DbResult<()> {
        let reference = order.ledger_reference();
        let mut tx = self.pool.begin().await?;
        lock_order(&mut tx, &order.id).await?;

        for line in physical_items(&mut tx, &order.id).await? {
            if ledger::movement_exists(&mut tx, &line.sku, &reference).await? {
                continue;
            }
            let movement = NewStockMovement::new(&line.sku, MovementType::Sale, -line.quantity)
                .unit_cost(duka_core::Money::from_cents(line.unit_price_cents))
                .reference(&reference)
                .performed_by(format!("customer:{}", order.customer_id));
            ledger::apply_movement(&mut tx, &movement).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::testing::{
        digital_order, digital_with_keys, new_order, record_success_payment, seed_sku, test_db,
        RecordingNotifier,
    };

    #[tokio::test]
    async fn test_fulfillment_runs_every_step_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let db = test_db().await.with_notifier(notifier.clone());
        let sku = seed_sku(&db, "FUL-PH-BLA", 5).await;
        let product = digital_with_keys(&db, "Antivirus", &["AV-1", "AV-2"]).await;
        let order = db
            .orders()
            .create_order(new_order(&[(&sku, 2, 1_000)], &[(&product, 1, 500)]))
            .await
            .unwrap();
        record_success_payment(&db, &order).await;

        let report = db.fulfillment().fulfill_order(&order.id).await.unwrap();
        assert!(report.is_complete(), "{:?}", report.failures);
        assert!(report.order_marked_paid);
        assert_eq!(report.licenses_assigned.len(), 1);
        assert!(report.shipment_request_id.is_some());
        assert!(report.stock_finalized);
        assert!(report.confirmation_sent);

        let again = db.fulfillment().fulfill_order(&order.id).await.unwrap();
        assert!(!again.order_marked_paid);
        assert!(!again.confirmation_sent);
        assert_eq!(again.licenses_assigned, report.licenses_assigned);
        assert_eq!(again.shipment_request_id, report.shipment_request_id);

        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 3);
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 1);
        assert_eq!(db.orders().get(&order.id).await.unwrap().status, OrderStatus::Paid);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_license_is_reported_not_raised() {
        let db = test_db().await;
        let product = digital_with_keys(&db, "Rare Plugin", &["RP-1"]).await;
        let first = digital_order(&db, &product).await;
        let second = digital_order(&db, &product).await;
        record_success_payment(&db, &first).await;
        record_success_payment(&db, &second).await;

        db.fulfillment().fulfill_order(&first.id).await.unwrap();
        let report = db.fulfillment().fulfill_order(&second.id).await.unwrap();

        assert!(!report.is_complete());
        assert!(report.order_marked_paid);
        assert!(report.failures[0].contains("license"));
        assert_eq!(db.orders().get(&second.id).await.unwrap().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_stock_shortfall_is_reported() {
        let db = test_db().await;
        let sku = seed_sku(&db, "FUL-SH-RED", 1).await;
        let order = db.orders().create_order(new_order(&[(&sku, 3, 100)], &[])).await.unwrap();
        record_success_payment(&db, &order).await;

        let report = db.fulfillment().fulfill_order(&order.id).await.unwrap();
        assert!(!report.stock_finalized);
        assert!(report.shipment_request_id.is_some());
        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 1);
    }

    #[tokio::test]
    async fn test_unpaid_or_cancelled_orders_are_refused() {
        let db = test_db().await;
        let sku = seed_sku(&db, "FUL-NP-BLU", 5).await;
        let product = digital_with_keys(&db, "Office Suite", &["OS-1"]).await;

        let unpaid = db
            .orders()
            .create_order(new_order(&[(&sku, 2, 1_000)], &[(&product, 1, 500)]))
            .await
            .unwrap();
        let cancelled = db
            .orders()
            .create_order(new_order(&[(&sku, 2, 1_000)], &[(&product, 1, 500)]))
            .await
            .unwrap();
        db.orders().cancel_order(&cancelled.id).await.unwrap();

        for order in [&unpaid, &cancelled] {
            let err = db.fulfillment().fulfill_order(&order.id).await.unwrap_err();
            assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })), "got {err}");
        }

        assert_eq!(db.orders().get(&unpaid.id).await.unwrap().status, OrderStatus::Pending);
        assert_eq!(db.orders().get(&cancelled.id).await.unwrap().status, OrderStatus::Cancelled);
        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 5);
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 1);

        let requests: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shipment_requests")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(requests, 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_stays_refused_even_with_a_success_row() {
        let db = test_db().await;
        let sku = seed_sku(&db, "FUL-CX-RED", 5).await;
        let order = db.orders().create_order(new_order(&[(&sku, 1, 100)], &[])).await.unwrap();
        db.orders().cancel_order(&order.id).await.unwrap();
        record_success_payment(&db, &order).await;

        let err = db.fulfillment().fulfill_order(&order.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidTransition { .. })));
        assert_eq!(db.inventory().get(&sku).await.unwrap().quantity_in_stock, 5);
    }
}
