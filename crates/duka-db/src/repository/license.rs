//! # License Repository
//!
//! Pool of pre-generated license keys and the digital-access grants made
//! when one is handed to an order.
//!
//! ```text
//! assign_license(order, product)       (one transaction)
//!      │
//!      ├── lock order row               (serializes retries for the same order)
//!      ├── key already on this order?   → return it, make sure the grant exists
//!      ├── UPDATE one free key ... RETURNING *
//!      │        none left               → NoLicenseAvailable
//!      └── INSERT customer_digital_access (unique per customer/product/order)
//! ```

use chrono::Utc;
use duka_core::fulfillment::{CustomerDigitalAccess, Order, SoftwareLicense};
use duka_core::{CoreError, ValidationError};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::new_id;
use super::order::lock_order;
use crate::error::{DbError, DbResult};

/// Repository for license keys and digital access.
#[derive(Debug, Clone)]
pub struct LicenseRepository {
    pool: SqlitePool,
}

impl LicenseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LicenseRepository { pool }
    }

    /// Adds unassigned keys for a digital product. Returns how many were added.
    pub async fn load_keys(&self, digital_product_id: &str, keys: &[String]) -> DbResult<usize> {
        if keys.is_empty() {
            return Err(ValidationError::Empty {
                field: "license_keys".to_string(),
            }
            .into());
        }
        if keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ValidationError::Required {
                field: "license_key".to_string(),
            }
            .into());
        }

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digital_products WHERE id = ?1")
            .bind(digital_product_id)
            .fetch_one(&self.pool)
            .await?;
        if known == 0 {
            return Err(DbError::not_found("DigitalProduct", digital_product_id));
        }

        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        for key in keys {
            sqlx::query(
                r#"
                INSERT INTO software_licenses (id, digital_product_id, license_key, is_assigned, created_at)
                VALUES (?1, ?2, ?3, 0, ?4)
                "#,
            )
            .bind(new_id())
            .bind(digital_product_id)
            .bind(key.trim())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(digital_product_id, count = keys.len(), "License keys loaded");
        Ok(keys.len())
    }

    /// Hands one free key of `digital_product_id` to the order.
    ///
    /// Calling it again for the same order and product returns the key
    /// assigned the first time.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown order
    /// - `NoLicenseAvailable` when every key of the product is taken
    pub async fn assign_license(&self, order_id: &str, digital_product_id: &str) -> DbResult<SoftwareLicense> {
        let mut tx = self.pool.begin().await?;
        let order = lock_order(&mut tx, order_id).await?;

        if let Some(existing) = assigned_to(&mut tx, order_id, digital_product_id).await? {
            grant_access(&mut tx, &order, digital_product_id).await?;
            tx.commit().await?;
            return Ok(existing);
        }

        let now = Utc::now();
        let license = sqlx::query_as::<_, SoftwareLicense>(
            r#"
            UPDATE software_licenses
            SET is_assigned = 1, assigned_to_order = ?2, assigned_at = ?3
            WHERE id = (
                SELECT id FROM software_licenses
                WHERE digital_product_id = ?1 AND is_assigned = 0
                ORDER BY rowid
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(digital_product_id)
        .bind(order_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(license) = license else {
            warn!(order_id, digital_product_id, "No license key left");
            return Err(CoreError::NoLicenseAvailable {
                digital_product_id: digital_product_id.to_string(),
            }
            .into());
        };

        grant_access(&mut tx, &order, digital_product_id).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            digital_product_id,
            license_id = %license.id,
            "License assigned"
        );
        Ok(license)
    }

    pub async fn available_count(&self, digital_product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM software_licenses WHERE digital_product_id = ?1 AND is_assigned = 0",
        )
        .bind(digital_product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn licenses_for_order(&self, order_id: &str) -> DbResult<Vec<SoftwareLicense>> {
        let rows = sqlx::query_as::<_, SoftwareLicense>(
            "SELECT * FROM software_licenses WHERE assigned_to_order = ?1 ORDER BY assigned_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Active grants of a customer, newest first.
    pub async fn grants_for_customer(&self, customer_id: &str) -> DbResult<Vec<CustomerDigitalAccess>> {
        let rows = sqlx::query_as::<_, CustomerDigitalAccess>(
            r#"
            SELECT * FROM customer_digital_access
            WHERE customer_id = ?1 AND is_active = 1
            ORDER BY rowid DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn assigned_to(
    conn: &mut SqliteConnection,
    order_id: &str,
    digital_product_id: &str,
) -> DbResult<Option<SoftwareLicense>> {
    let row = sqlx::query_as::<_, SoftwareLicense>(
        "SELECT * FROM software_licenses WHERE assigned_to_order = ?1 AND digital_product_id = ?2",
    )
    .bind(order_id)
    .bind(digital_product_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

async fn grant_access(conn: &mut SqliteConnection, order: &Order, digital_product_id: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO customer_digital_access (
            id, customer_id, digital_product_id, order_id, access_granted_at, is_active
        ) VALUES (?1, ?2, ?3, ?4, ?5, 1)
        ON CONFLICT (customer_id, digital_product_id, order_id) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(&order.customer_id)
    .bind(digital_product_id)
    .bind(&order.id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{digital_order, digital_with_keys, file_db, test_db};

    #[tokio::test]
    async fn test_assign_is_idempotent_per_order() {
        let db = test_db().await;
        let product = digital_with_keys(&db, "Office Suite", &["KEY-A", "KEY-B"]).await;
        let order = digital_order(&db, &product).await;

        let first = db.licenses().assign_license(&order.id, &product).await.unwrap();
        let second = db.licenses().assign_license(&order.id, &product).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_assigned);
        assert_eq!(first.assigned_to_order.as_deref(), Some(order.id.as_str()));
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 1);

        let grants = db.licenses().grants_for_customer(&order.customer_id).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].order_id, order.id);
    }

    #[tokio::test]
    async fn test_last_key_goes_to_exactly_one_order() {
        let (db, _guard) = file_db().await;
        let product = digital_with_keys(&db, "Photo Editor", &["ONLY-KEY"]).await;
        let a = digital_order(&db, &product).await;
        let b = digital_order(&db, &product).await;

        let mut handles = Vec::new();
        for order_id in [a.id.clone(), b.id.clone()] {
            let db = db.clone();
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                db.licenses().assign_license(&order_id, &product).await
            }));
        }

        let mut assigned = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => assigned += 1,
                Err(DbError::Domain(CoreError::NoLicenseAvailable { .. })) => exhausted += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((assigned, exhausted), (1, 1));
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_retries_for_one_order_take_one_key() {
        let (db, _guard) = file_db().await;
        let product = digital_with_keys(&db, "VPN", &["V-1", "V-2", "V-3"]).await;
        let order = digital_order(&db, &product).await;

        let mut handles = Vec::new();
        for _ in 0..3 {
            let db = db.clone();
            let order_id = order.id.clone();
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                db.licenses().assign_license(&order_id, &product).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.licenses().available_count(&product).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let db = test_db().await;
        let product = digital_with_keys(&db, "Game", &["DUP"]).await;
        let err = db.licenses().load_keys(&product, &["DUP".to_string()]).await.unwrap_err();
        assert!(err.is_unique_violation());
    }
}
