//! # Order Repository
//!
//! Customer orders: the documents a control-number payment settles.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use duka_core::fulfillment::{
    format_order_number, NewOrder, Order, OrderItemDigital, OrderItemPhysical, OrderStatus,
};
use duka_core::payment::PaymentStatus;
use duka_core::validation::{validate_phone, validate_price_cents, validate_quantity, validate_sku};
use duka_core::{CoreError, ValidationError, MAX_LINES_PER_DOCUMENT};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{lock_rows, lock_series, new_id};
use crate::error::{DbError, DbResult};

/// Random order numbers tried before giving up.
const MAX_NUMBER_ATTEMPTS: usize = 5;

/// Repository for customer orders.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Creates a PENDING order with its physical and digital lines.
    pub async fn create_order(&self, order: NewOrder) -> DbResult<Order> {
        validate_new_order(&order)?;
        let total = order.total_amount()?;

        let mut tx = self.pool.begin().await?;
        lock_series(&mut tx, "ORDER").await?;

        for line in &order.physical_items {
            let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory WHERE sku = ?1")
                .bind(&line.sku)
                .fetch_one(&mut *tx)
                .await?;
            if known == 0 {
                return Err(DbError::not_found("Inventory", line.sku.as_str()));
            }
        }
        for line in &order.digital_items {
            let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digital_products WHERE id = ?1")
                .bind(&line.digital_product_id)
                .fetch_one(&mut *tx)
                .await?;
            if known == 0 {
                return Err(DbError::not_found("DigitalProduct", line.digital_product_id.as_str()));
            }
        }

        let now = Utc::now();
        let order_number = free_order_number(&mut tx, now.year()).await?;

        let header = Order {
            id: new_id(),
            order_number,
            customer_id: order.customer_id.trim().to_string(),
            customer_phone: order.customer_phone.trim().to_string(),
            status: OrderStatus::Pending,
            order_total_cents: total.cents(),
            is_digital: order.physical_items.is_empty(),
            order_date: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, customer_phone, status,
                order_total_cents, is_digital, order_date, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&header.id)
        .bind(&header.order_number)
        .bind(&header.customer_id)
        .bind(&header.customer_phone)
        .bind(header.status)
        .bind(header.order_total_cents)
        .bind(header.is_digital)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &order.physical_items {
            sqlx::query(
                r#"
                INSERT INTO order_items_physical (id, order_id, sku, quantity, unit_price_cents)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(new_id())
            .bind(&header.id)
            .bind(&line.sku)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        for line in &order.digital_items {
            sqlx::query(
                r#"
                INSERT INTO order_items_digital (id, order_id, digital_product_id, quantity, unit_price_cents)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(new_id())
            .bind(&header.id)
            .bind(&line.digital_product_id)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            order_number = %header.order_number,
            customer = %header.customer_id,
            total = header.order_total_cents,
            digital = header.is_digital,
            "Order created"
        );
        Ok(header)
    }

    /// Cancels an unpaid order and every open payment attempt for it.
    pub async fn cancel_order(&self, order_id: &str) -> DbResult<Order> {
        let mut tx = self.pool.begin().await?;
        let order = lock_order(&mut tx, order_id).await?;

        let paid: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE order_id = ?1 AND status = ?2",
        )
        .bind(order_id)
        .bind(PaymentStatus::Success)
        .fetch_one(&mut *tx)
        .await?;

        if paid > 0 || order.status != OrderStatus::Pending {
            return Err(
                CoreError::invalid_transition("Order", order_id, order.status, OrderStatus::Cancelled)
                    .into(),
            );
        }

        let now = Utc::now();
        let cancelled_payments = sqlx::query(
            r#"
            UPDATE payments SET status = ?2, updated_at = ?4
            WHERE order_id = ?1 AND status IN (?3, ?5)
            "#,
        )
        .bind(order_id)
        .bind(PaymentStatus::Cancelled)
        .bind(PaymentStatus::Pending)
        .bind(now)
        .bind(PaymentStatus::WaitingPayment)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let cancelled = set_order_status(&mut tx, order_id, OrderStatus::Cancelled).await?;
        tx.commit().await?;

        info!(
            order_number = %cancelled.order_number,
            cancelled_payments,
            "Order cancelled"
        );
        Ok(cancelled)
    }

    pub async fn get(&self, order_id: &str) -> DbResult<Order> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Order> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_number = ?1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_number))
    }

    pub async fn physical_items(&self, order_id: &str) -> DbResult<Vec<OrderItemPhysical>> {
        let mut conn = self.pool.acquire().await?;
        physical_items(&mut conn, order_id).await
    }

    pub async fn digital_items(&self, order_id: &str) -> DbResult<Vec<OrderItemDigital>> {
        let mut conn = self.pool.acquire().await?;
        digital_items(&mut conn, order_id).await
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn lock_order(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Order> {
    if !lock_rows(conn, "orders", "id", order_id).await? {
        return Err(DbError::not_found("Order", order_id));
    }
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(order)
}

pub(crate) async fn set_order_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    status: OrderStatus,
) -> DbResult<Order> {
    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = ?2, updated_at = ?3 WHERE id = ?1 RETURNING *",
    )
    .bind(order_id)
    .bind(status)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    debug!(order_id, status = %status, "Order status changed");
    Ok(order)
}

pub(crate) async fn physical_items(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<Vec<OrderItemPhysical>> {
    let items = sqlx::query_as::<_, OrderItemPhysical>(
        "SELECT * FROM order_items_physical WHERE order_id = ?1 ORDER BY sku",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

pub(crate) async fn digital_items(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<Vec<OrderItemDigital>> {
    let items = sqlx::query_as::<_, OrderItemDigital>(
        "SELECT * FROM order_items_digital WHERE order_id = ?1 ORDER BY rowid",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

async fn free_order_number(conn: &mut SqliteConnection, year: i32) -> DbResult<String> {
    for _ in 0..MAX_NUMBER_ATTEMPTS {
        let candidate = format_order_number(year, rand::random::<u32>());
        let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE order_number = ?1")
            .bind(&candidate)
            .fetch_one(&mut *conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
        debug!(candidate = %candidate, "Order number taken, retrying");
    }
    Err(DbError::duplicate("order_number", format!("ORD-{}-*", year)))
}

fn validate_new_order(order: &NewOrder) -> Result<(), ValidationError> {
    if order.customer_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "customer_id".to_string(),
        });
    }
    validate_phone(&order.customer_phone)?;

    let lines = order.physical_items.len() + order.digital_items.len();
    if lines == 0 {
        return Err(ValidationError::Empty {
            field: "items".to_string(),
        });
    }
    if lines > MAX_LINES_PER_DOCUMENT {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_LINES_PER_DOCUMENT as i64,
        });
    }

    let mut skus = HashSet::new();
    for line in &order.physical_items {
        validate_sku(&line.sku)?;
        validate_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price_cents)?;
        if !skus.insert(line.sku.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "physical_items.sku".to_string(),
                value: line.sku.clone(),
            });
        }
    }

    let mut products = HashSet::new();
    for line in &order.digital_items {
        validate_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price_cents)?;
        if !products.insert(line.digital_product_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "digital_items.digital_product_id".to_string(),
                value: line.digital_product_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{digital_with_keys, new_order, seed_sku, test_db};
    use duka_core::fulfillment::NewOrderDigitalLine;

    #[tokio::test]
    async fn test_create_order_number_and_flags() {
        let db = test_db().await;
        let sku = seed_sku(&db, "ORD-PH-BLA", 5).await;

        let order = db.orders().create_order(new_order(&[(&sku, 2, 10_000)], &[])).await.unwrap();
        let year = Utc::now().year();

        assert!(order.order_number.starts_with(&format!("ORD-{}-", year)));
        assert_eq!(order.order_number.len(), "ORD-2026-".len() + 6);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.order_total_cents, 20_000);
        assert!(!order.is_digital);
        assert_eq!(db.orders().physical_items(&order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_digital_only_order() {
        let db = test_db().await;
        let product = digital_with_keys(&db, "Antivirus 1yr", &["AV-1"]).await;

        let mut order = new_order(&[], &[]);
        order.digital_items.push(NewOrderDigitalLine {
            digital_product_id: product.clone(),
            quantity: 1,
            unit_price_cents: 3_000,
        });
        let order = db.orders().create_order(order).await.unwrap();

        assert!(order.is_digital);
        assert_eq!(db.orders().digital_items(&order.id).await.unwrap()[0].digital_product_id, product);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_unknown() {
        let db = test_db().await;
        let empty = db.orders().create_order(new_order(&[], &[])).await.unwrap_err();
        assert!(matches!(empty.as_validation(), Some(ValidationError::Empty { .. })));

        let unknown = db
            .orders()
            .create_order(new_order(&[("GHOST-1", 1, 100)], &[]))
            .await
            .unwrap_err();
        assert!(matches!(unknown, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_pending_order() {
        let db = test_db().await;
        let sku = seed_sku(&db, "ORD-CA-RED", 5).await;
        let order = db.orders().create_order(new_order(&[(&sku, 1, 500)], &[])).await.unwrap();

        let cancelled = db.orders().cancel_order(&order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(db.orders().cancel_order(&order.id).await.is_err());
    }
}
