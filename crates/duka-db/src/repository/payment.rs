//! # Payment Repository
//!
//! Control-number settlement for customer orders.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PENDING ──gateway ok──► WAITING_PAYMENT ──webhook, amount ok──► SUCCESS│
//! │     │                        │    │                              (final)│
//! │     └──gateway error──► FAILED    └──past expiry──► EXPIRED            │
//! │                                                                         │
//! │  any open attempt ──order cancelled / superseded──► CANCELLED          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Webhook Flow
//! ```text
//! handle_webhook(payload)                          never returns Err
//!      │
//!      ├── fields missing / amount unreadable     → InvalidPayload   400
//!      ├── lock local_payment_details by CN       → NotFound         404
//!      ├── payment SUCCESS already                → AlreadyProcessed 200
//!      ├── payment CANCELLED / FAILED             → NotPayable       400
//!      ├── past expiry                            → EXPIRED, Expired 400
//!      ├── amount ≠ amount_due                    → AmountMismatch   200 (no change)
//!      ├── SUCCESS + transaction_id, COMMIT       → Settled          200
//!      └── fulfill_order (after commit; failures logged, never undo SUCCESS)
//! ```
//!
//! The gateway call in `request_control_number` happens between two short
//! transactions so no database lock is held while waiting on the network.

use std::sync::Arc;

use chrono::Utc;
use duka_core::fulfillment::{Order, OrderStatus};
use duka_core::payment::{
    ControlNumberRequest, LocalPaymentDetails, Payment, PaymentStatus, WebhookNotice,
    WebhookOutcome, WebhookPayload,
};
use duka_core::CoreError;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use super::fulfillment::FulfillmentService;
use super::order::lock_order;
use super::{lock_rows, new_id};
use crate::error::{DbError, DbResult};
use crate::gateway::PaymentGateway;
use crate::notify::Notifier;

/// Repository for payments and their control numbers.
#[derive(Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    fulfillment: FulfillmentService,
    payment_method: String,
}

impl std::fmt::Debug for PaymentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentRepository")
            .field("payment_method", &self.payment_method)
            .finish_non_exhaustive()
    }
}

impl PaymentRepository {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        fulfillment: FulfillmentService,
        payment_method: String,
    ) -> Self {
        PaymentRepository {
            pool,
            gateway,
            notifier,
            fulfillment,
            payment_method,
        }
    }

    /// Opens a payment attempt for a PENDING order and obtains its control
    /// number from the gateway.
    ///
    /// Older open attempts of the same order are cancelled first.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown order
    /// - `InvalidTransition` when the order is not PENDING
    /// - `ExternalGateway` when the gateway fails; the attempt is left FAILED
    pub async fn request_control_number(&self, order_id: &str) -> DbResult<(Payment, LocalPaymentDetails)> {
        let (order, payment) = self.open_attempt(order_id).await?;

        let request = ControlNumberRequest {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            amount: order.order_total(),
            phone_number: order.customer_phone.clone(),
        };
        let request_json = serde_json::json!({
            "order_id": request.order_id,
            "order_number": request.order_number,
            "amount": request.amount.to_decimal_string(),
            "phone_number": request.phone_number,
        });

        let grant = match self.gateway.request_control_number(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                error!(order_number = %order.order_number, payment_id = %payment.id, error = %e, "Control number request failed");
                self.mark_failed(&payment.id).await?;
                return Err(e.into());
            }
        };

        let mut tx = self.pool.begin().await?;
        let current = lock_payment(&mut tx, &payment.id).await?;
        if !current.status.can_transition_to(PaymentStatus::WaitingPayment) {
            // Cancelled while the gateway was answering.
            return Err(CoreError::invalid_transition(
                "Payment",
                &payment.id,
                current.status,
                PaymentStatus::WaitingPayment,
            )
            .into());
        }

        let now = Utc::now();
        let details = LocalPaymentDetails {
            id: new_id(),
            payment_id: payment.id.clone(),
            control_number: grant.control_number.clone(),
            expiry_time: grant.expiry_time,
            gateway_request: Some(request_json.to_string()),
            gateway_response: Some(grant.raw_response.to_string()),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO local_payment_details (
                id, payment_id, control_number, expiry_time,
                gateway_request, gateway_response, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&details.id)
        .bind(&details.payment_id)
        .bind(&details.control_number)
        .bind(details.expiry_time)
        .bind(&details.gateway_request)
        .bind(&details.gateway_response)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let payment = set_payment_status(&mut tx, &payment.id, PaymentStatus::WaitingPayment).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            payment_id = %payment.id,
            control_number = %details.control_number,
            expires = %details.expiry_time,
            "Control number issued"
        );

        let message = format!(
            "Pay {} for order {} using control number {}. Valid until {}.",
            order.order_total(),
            order.order_number,
            details.control_number,
            details.expiry_time.format("%Y-%m-%d %H:%M UTC"),
        );
        if !self.notifier.notify(&order.customer_phone, &message).await {
            warn!(order_number = %order.order_number, "Control number notice not delivered");
        }

        Ok((payment, details))
    }

    /// Processes one gateway webhook delivery.
    ///
    /// Always answers; internal failures become
    /// [`WebhookOutcome::InternalError`] with the transaction rolled back.
    pub async fn handle_webhook(&self, payload: WebhookPayload) -> WebhookOutcome {
        let notice = match payload.into_notice() {
            Ok(notice) => notice,
            Err(e) => {
                warn!(reason = %e, "Invalid webhook payload");
                return WebhookOutcome::InvalidPayload { reason: e.to_string() };
            }
        };

        let outcome = match self.settle(&notice).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(control_number = %notice.control_number, error = %e, "Webhook processing error");
                return WebhookOutcome::InternalError { message: e.to_string() };
            }
        };

        if let WebhookOutcome::Settled { order_id, .. } = &outcome {
            if let Err(e) = self.fulfillment.fulfill_order(order_id).await {
                error!(
                    order_id = %order_id,
                    error = %e,
                    "CRITICAL: fulfillment could not run after payment success"
                );
            }
        }

        debug!(status = outcome.status_code(), detail = %outcome.detail(), "Webhook answered");
        outcome
    }

    /// Moves WAITING_PAYMENT attempts past their expiry to EXPIRED.
    /// Returns how many were expired.
    pub async fn expire_overdue(&self) -> DbResult<u64> {
        let now = Utc::now();
        let candidates: Vec<(String, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT p.id, d.expiry_time FROM payments p
            JOIN local_payment_details d ON d.payment_id = p.id
            WHERE p.status = ?1
            "#,
        )
        .bind(PaymentStatus::WaitingPayment)
        .fetch_all(&self.pool)
        .await?;

        let overdue: Vec<String> = candidates
            .into_iter()
            .filter(|(_, expiry)| *expiry < now)
            .map(|(id, _)| id)
            .collect();

        if overdue.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut expired = 0;
        for payment_id in &overdue {
            // Status guard: a webhook may have settled it since the scan.
            expired += sqlx::query(
                "UPDATE payments SET status = ?2, updated_at = ?4 WHERE id = ?1 AND status = ?3",
            )
            .bind(payment_id)
            .bind(PaymentStatus::Expired)
            .bind(PaymentStatus::WaitingPayment)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        info!(expired, "Overdue payments expired");
        Ok(expired)
    }

    pub async fn get_payment(&self, payment_id: &str) -> DbResult<Payment> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Payment", payment_id))
    }

    /// Every attempt for an order, newest first.
    pub async fn payments_for_order(&self, order_id: &str) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE order_id = ?1 ORDER BY rowid DESC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn details_by_control_number(&self, control_number: &str) -> DbResult<LocalPaymentDetails> {
        sqlx::query_as::<_, LocalPaymentDetails>(
            "SELECT * FROM local_payment_details WHERE control_number = ?1",
        )
        .bind(control_number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("LocalPaymentDetails", control_number))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Locks the order, supersedes older open attempts and inserts a
    /// PENDING payment.
    async fn open_attempt(&self, order_id: &str) -> DbResult<(Order, Payment)> {
        let mut tx = self.pool.begin().await?;
        let order = lock_order(&mut tx, order_id).await?;

        if order.status != OrderStatus::Pending {
            return Err(CoreError::invalid_transition("Order", order_id, order.status, OrderStatus::Paid).into());
        }

        let now = Utc::now();
        let superseded = sqlx::query(
            r#"
            UPDATE payments SET status = ?2, updated_at = ?3
            WHERE order_id = ?1 AND status IN (?4, ?5)
            "#,
        )
        .bind(order_id)
        .bind(PaymentStatus::Cancelled)
        .bind(now)
        .bind(PaymentStatus::Pending)
        .bind(PaymentStatus::WaitingPayment)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let payment = Payment {
            id: new_id(),
            order_id: order.id.clone(),
            amount_due_cents: order.order_total_cents,
            status: PaymentStatus::Pending,
            transaction_id: None,
            payment_method: self.payment_method.clone(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, amount_due_cents, status, transaction_id,
                payment_method, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?6)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(payment.amount_due_cents)
        .bind(payment.status)
        .bind(&payment.payment_method)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if superseded > 0 {
            info!(order_number = %order.order_number, superseded, "Earlier payment attempts cancelled");
        }
        Ok((order, payment))
    }

    async fn mark_failed(&self, payment_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let current = lock_payment(&mut tx, payment_id).await?;
        if current.status.can_transition_to(PaymentStatus::Failed) {
            set_payment_status(&mut tx, payment_id, PaymentStatus::Failed).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// The locked part of the webhook. Commits only on EXPIRED and SUCCESS.
    async fn settle(&self, notice: &WebhookNotice) -> DbResult<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        if !lock_rows(&mut tx, "local_payment_details", "control_number", &notice.control_number).await? {
            warn!(control_number = %notice.control_number, "Webhook for unknown control number");
            return Ok(WebhookOutcome::NotFound {
                control_number: notice.control_number.clone(),
            });
        }

        let details = sqlx::query_as::<_, LocalPaymentDetails>(
            "SELECT * FROM local_payment_details WHERE control_number = ?1",
        )
        .bind(&notice.control_number)
        .fetch_one(&mut *tx)
        .await?;

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?1")
            .bind(&details.payment_id)
            .fetch_one(&mut *tx)
            .await?;

        match payment.status {
            PaymentStatus::Success => {
                info!(payment_id = %payment.id, "Webhook replay ignored");
                return Ok(WebhookOutcome::AlreadyProcessed { payment_id: payment.id });
            }
            PaymentStatus::Expired => {
                return Ok(WebhookOutcome::Expired { payment_id: payment.id });
            }
            PaymentStatus::Cancelled | PaymentStatus::Failed | PaymentStatus::Pending => {
                warn!(payment_id = %payment.id, status = %payment.status, "Webhook for unpayable attempt");
                return Ok(WebhookOutcome::NotPayable {
                    payment_id: payment.id,
                    status: payment.status,
                });
            }
            PaymentStatus::WaitingPayment => {}
        }

        if details.is_expired_at(Utc::now()) {
            set_payment_status(&mut tx, &payment.id, PaymentStatus::Expired).await?;
            tx.commit().await?;
            warn!(payment_id = %payment.id, control_number = %details.control_number, "Payment expired");
            return Ok(WebhookOutcome::Expired { payment_id: payment.id });
        }

        let expected = payment.amount_due();
        if notice.amount != expected {
            warn!(
                control_number = %details.control_number,
                expected = %expected,
                received = %notice.amount,
                "Payment amount mismatch; manual reconciliation required"
            );
            return Ok(WebhookOutcome::AmountMismatch {
                payment_id: payment.id,
                expected,
                received: notice.amount,
            });
        }

        sqlx::query(
            r#"
            UPDATE payments SET status = ?2, transaction_id = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(&payment.id)
        .bind(PaymentStatus::Success)
        .bind(&notice.transaction_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            transaction_id = %notice.transaction_id,
            "Payment settled"
        );
        Ok(WebhookOutcome::Settled {
            payment_id: payment.id,
            order_id: payment.order_id,
            transaction_id: notice.transaction_id.clone(),
        })
    }
}

async fn lock_payment(conn: &mut SqliteConnection, payment_id: &str) -> DbResult<Payment> {
    if !lock_rows(conn, "payments", "id", payment_id).await? {
        return Err(DbError::not_found("Payment", payment_id));
    }
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?1")
        .bind(payment_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(payment)
}

async fn set_payment_status(
    conn: &mut SqliteConnection,
    payment_id: &str,
    status: PaymentStatus,
) -> DbResult<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments SET status = ?2, updated_at = ?3 WHERE id = ?1 RETURNING *",
    )
    .bind(payment_id)
    .bind(status)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(payment)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        digital_with_keys, file_db, new_order, seed_sku, test_db, RecordingNotifier, ScriptedGateway,
    };
    use crate::Database;
    use duka_core::Money;

    async fn paid_order_fixture(db: &Database) -> (Order, String) {
        let sku = seed_sku(db, "PAY-PH-BLA", 10).await;
        let product = digital_with_keys(db, "Antivirus", &["AV-1", "AV-2"]).await;
        let order = db
            .orders()
            .create_order(new_order(&[(&sku, 1, 100_000)], &[(&product, 1, 50_000)]))
            .await
            .unwrap();
        (order, product)
    }

    #[tokio::test]
    async fn test_request_control_number_moves_to_waiting() {
        let notifier = Arc::new(RecordingNotifier::default());
        let db = test_db().await.with_notifier(notifier.clone());
        let (order, _) = paid_order_fixture(&db).await;

        let (payment, details) = db.payments().request_control_number(&order.id).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::WaitingPayment);
        assert_eq!(payment.amount_due_cents, 150_000);
        assert_eq!(payment.payment_method, "GePG");
        assert!(details.control_number.starts_with("CN"));
        assert!(details.gateway_request.as_deref().unwrap().contains(&order.order_number));
        assert!(notifier.sent()[0].1.contains(&details.control_number));
    }

    #[tokio::test]
    async fn test_new_request_supersedes_open_attempt() {
        let db = test_db().await;
        let (order, _) = paid_order_fixture(&db).await;

        let (first, _) = db.payments().request_control_number(&order.id).await.unwrap();
        let (second, _) = db.payments().request_control_number(&order.id).await.unwrap();

        assert_eq!(db.payments().get_payment(&first.id).await.unwrap().status, PaymentStatus::Cancelled);
        assert_eq!(second.status, PaymentStatus::WaitingPayment);
        assert_eq!(db.payments().payments_for_order(&order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gateway_failure_marks_attempt_failed() {
        let db = test_db().await.with_gateway(Arc::new(ScriptedGateway::failing()));
        let (order, _) = paid_order_fixture(&db).await;

        let err = db.payments().request_control_number(&order.id).await.unwrap_err();
        assert!(matches!(err, DbError::ExternalGateway(_)));

        let attempts = db.payments().payments_for_order(&order.id).await.unwrap();
        assert_eq!(attempts[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_webhook_settles_and_fulfills_once() {
        let db = test_db().await;
        let (order, product) = paid_order_fixture(&db).await;
        let (payment, details) = db.payments().request_control_number(&order.id).await.unwrap();

        let outcome = db
            .payments()
            .handle_webhook(WebhookPayload::new(&details.control_number, "TX-1", "1500.00"))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Settled { .. }));
        assert_eq!(outcome.status_code(), 200);

        let replay = db
            .payments()
            .handle_webhook(WebhookPayload::new(&details.control_number, "TX-1", "1500.00"))
            .await;
        assert_eq!(replay, WebhookOutcome::AlreadyProcessed { payment_id: payment.id.clone() });

        let settled = db.payments().get_payment(&payment.id).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);
        assert_eq!(settled.transaction_id.as_deref(), Some("TX-1"));

        assert_eq!(db.orders().get(&order.id).await.unwrap().status, OrderStatus::Paid);
        assert_eq!(db.licenses().licenses_for_order(&order.id).await.unwrap().len(), 1);
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 1);
        assert_eq!(db.inventory().get("PAY-PH-BLA").await.unwrap().quantity_in_stock, 9);
        assert!(db.shipments().plan_for_order(&order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_settle_once() {
        let (db, _guard) = file_db().await;
        let (order, _) = paid_order_fixture(&db).await;
        let (_, details) = db.payments().request_control_number(&order.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            let cn = details.control_number.clone();
            handles.push(tokio::spawn(async move {
                db.payments().handle_webhook(WebhookPayload::new(cn, "TX-RACE", "1500.00")).await
            }));
        }

        let mut settled = 0;
        let mut replays = 0;
        for handle in handles {
            match handle.await.unwrap() {
                WebhookOutcome::Settled { .. } => settled += 1,
                WebhookOutcome::AlreadyProcessed { .. } => replays += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!((settled, replays), (1, 3));
        assert_eq!(db.licenses().licenses_for_order(&order.id).await.unwrap().len(), 1);
        assert_eq!(db.inventory().get("PAY-PH-BLA").await.unwrap().quantity_in_stock, 9);
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_acknowledged_without_change() {
        let db = test_db().await;
        let (order, _) = paid_order_fixture(&db).await;
        let (payment, details) = db.payments().request_control_number(&order.id).await.unwrap();

        let outcome = db
            .payments()
            .handle_webhook(WebhookPayload::new(&details.control_number, "TX-2", "1499.99"))
            .await;

        assert_eq!(
            outcome,
            WebhookOutcome::AmountMismatch {
                payment_id: payment.id.clone(),
                expected: Money::from_cents(150_000),
                received: Money::from_cents(149_999),
            }
        );
        assert_eq!(outcome.status_code(), 200);
        assert_eq!(
            db.payments().get_payment(&payment.id).await.unwrap().status,
            PaymentStatus::WaitingPayment
        );
        assert_eq!(db.orders().get(&order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_control_number() {
        let db = test_db().await.with_gateway(Arc::new(ScriptedGateway::expired()));
        let (order, _) = paid_order_fixture(&db).await;
        let (payment, details) = db.payments().request_control_number(&order.id).await.unwrap();

        let outcome = db
            .payments()
            .handle_webhook(WebhookPayload::new(&details.control_number, "TX-3", "1500.00"))
            .await;

        assert_eq!(outcome, WebhookOutcome::Expired { payment_id: payment.id.clone() });
        assert_eq!(outcome.status_code(), 400);
        assert_eq!(db.payments().get_payment(&payment.id).await.unwrap().status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_expire_overdue_sweep() {
        let db = test_db().await.with_gateway(Arc::new(ScriptedGateway::expired()));
        let (order, _) = paid_order_fixture(&db).await;
        let (payment, _) = db.payments().request_control_number(&order.id).await.unwrap();

        assert_eq!(db.payments().expire_overdue().await.unwrap(), 1);
        assert_eq!(db.payments().expire_overdue().await.unwrap(), 0);
        assert_eq!(db.payments().get_payment(&payment.id).await.unwrap().status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_webhooks() {
        let db = test_db().await;

        let unknown = db
            .payments()
            .handle_webhook(WebhookPayload::new("CN-NOPE", "TX-4", "10.00"))
            .await;
        assert_eq!(unknown.status_code(), 404);

        let malformed = db
            .payments()
            .handle_webhook(WebhookPayload {
                control_number: Some("CN-1".to_string()),
                transaction_id: None,
                amount: Some(serde_json::json!("10.00")),
            })
            .await;
        assert!(matches!(malformed, WebhookOutcome::InvalidPayload { .. }));
        assert_eq!(malformed.status_code(), 400);
    }

    #[tokio::test]
    async fn test_cancelled_order_rejects_payment() {
        let db = test_db().await;
        let (order, _) = paid_order_fixture(&db).await;
        let (payment, details) = db.payments().request_control_number(&order.id).await.unwrap();

        db.orders().cancel_order(&order.id).await.unwrap();
        let outcome = db
            .payments()
            .handle_webhook(WebhookPayload::new(&details.control_number, "TX-5", "1500.00"))
            .await;

        assert_eq!(
            outcome,
            WebhookOutcome::NotPayable {
                payment_id: payment.id,
                status: PaymentStatus::Cancelled,
            }
        );
        assert!(db.payments().request_control_number(&order.id).await.is_err());
    }
}
