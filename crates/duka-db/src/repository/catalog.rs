//! # Catalog Repository
//!
//! Product specifications (one per SKU) and digital products.
//!
//! ## SKU Assignment
//! ```text
//! create_specification(spec)
//!      │
//!      ├── lock 'SKU' series          (serializes concurrent creators)
//!      ├── SAM-PH-BLA free?           → take it
//!      ├── SAM-PH-BLA-01 .. -09 free? → take the first
//!      ├── SAM-PH-BLA-<6 hex>         → random suffix until free
//!      ├── INSERT product_specifications
//!      └── INSERT inventory (qty 0, safety stock)
//! ```

use chrono::Utc;
use duka_core::sku::{numbered_candidate, suffixed_candidate, sku_base, MAX_NUMBERED_CANDIDATES};
use duka_core::validation::{validate_price_cents, validate_product_name};
use duka_core::{DigitalProduct, NewSpecification, ProductSpecification, ValidationError};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{lock_series, new_id};
use crate::error::{DbError, DbResult};

/// Random suffixes tried before giving up.
const MAX_SUFFIX_ATTEMPTS: usize = 5;

/// Repository for catalog operations.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
    default_safety_stock: i64,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool, default_safety_stock: i64) -> Self {
        CatalogRepository {
            pool,
            default_safety_stock,
        }
    }

    /// Creates a specification with a derived SKU and its inventory row.
    pub async fn create_specification(&self, spec: NewSpecification) -> DbResult<ProductSpecification> {
        validate_product_name(&spec.product_name)?;
        validate_price_cents("original_price", spec.original_price_cents)?;
        validate_price_cents("sale_price", spec.sale_price_cents)?;

        let safety = spec.safety_stock_level.unwrap_or(self.default_safety_stock);
        if safety < 0 {
            return Err(ValidationError::OutOfRange {
                field: "safety_stock_level".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        let mut tx = self.pool.begin().await?;
        lock_series(&mut tx, "SKU").await?;

        let base = sku_base(&spec.brand, &spec.category, spec.color.as_deref().unwrap_or(""));
        let sku = free_sku(&mut tx, &base).await?;

        let now = Utc::now();
        let record = ProductSpecification {
            id: new_id(),
            sku: sku.clone(),
            product_name: spec.product_name.trim().to_string(),
            brand: spec.brand,
            category: spec.category,
            color: spec.color,
            original_price_cents: spec.original_price_cents,
            sale_price_cents: spec.sale_price_cents,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO product_specifications (
                id, sku, product_name, brand, category, color,
                original_price_cents, sale_price_cents, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&record.id)
        .bind(&record.sku)
        .bind(&record.product_name)
        .bind(&record.brand)
        .bind(&record.category)
        .bind(&record.color)
        .bind(record.original_price_cents)
        .bind(record.sale_price_cents)
        .bind(record.is_active)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO inventory (
                sku, quantity_in_stock, safety_stock_level, location,
                created_at, updated_at
            ) VALUES (?1, 0, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(&record.sku)
        .bind(safety)
        .bind(&spec.location)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(sku = %record.sku, name = %record.product_name, "Product specification created");
        Ok(record)
    }

    pub async fn get_specification(&self, sku: &str) -> DbResult<ProductSpecification> {
        sqlx::query_as::<_, ProductSpecification>(
            "SELECT * FROM product_specifications WHERE sku = ?1",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("ProductSpecification", sku))
    }

    pub async fn create_digital_product(&self, name: &str) -> DbResult<DigitalProduct> {
        validate_product_name(name)?;

        let product = DigitalProduct {
            id: new_id(),
            name: name.trim().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO digital_products (id, name, is_active, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;

        debug!(id = %product.id, name = %product.name, "Digital product created");
        Ok(product)
    }

    pub async fn get_digital_product(&self, id: &str) -> DbResult<DigitalProduct> {
        sqlx::query_as::<_, DigitalProduct>("SELECT * FROM digital_products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("DigitalProduct", id))
    }
}

async fn sku_taken(conn: &mut SqliteConnection, sku: &str) -> DbResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_specifications WHERE sku = ?1")
        .bind(sku)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

async fn free_sku(conn: &mut SqliteConnection, base: &str) -> DbResult<String> {
    if !sku_taken(conn, base).await? {
        return Ok(base.to_string());
    }

    for n in 1..=MAX_NUMBERED_CANDIDATES {
        let candidate = numbered_candidate(base, n);
        if !sku_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
    }

    for _ in 0..MAX_SUFFIX_ATTEMPTS {
        let candidate = suffixed_candidate(base, rand::random::<u32>());
        if !sku_taken(conn, &candidate).await? {
            debug!(base, sku = %candidate, "Numbered SKUs exhausted, using random suffix");
            return Ok(candidate);
        }
    }

    Err(DbError::duplicate("sku", base))
}
