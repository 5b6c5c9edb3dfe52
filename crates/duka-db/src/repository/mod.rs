//! # Repository Module
//!
//! Database repository implementations for the back office.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and who feeds the ledger                │
//! │                                                                         │
//! │  SaleRepository ───────┐                                               │
//! │  ReceptionRepository ──┼──► ledger::apply_movement ──► inventory       │
//! │  InventoryRepository ──┤        (same transaction)      stock_movements │
//! │  FulfillmentService ───┘                                               │
//! │                                                                         │
//! │  PaymentRepository ──SUCCESS──► FulfillmentService                     │
//! │                                   ├── LicenseRepository                │
//! │                                   └── ShipmentRepository               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CatalogRepository`](catalog::CatalogRepository) - Specifications and digital products
//! - [`InventoryRepository`](inventory::InventoryRepository) - Stock levels and manual adjustments
//! - [`ReceptionRepository`](reception::ReceptionRepository) - Goods received against PO lines
//! - [`PurchaseOrderRepository`](purchasing::PurchaseOrderRepository) - PO headers, lines, numbering
//! - [`SaleRepository`](sale::SaleRepository) - Point-of-sale transactions
//! - [`OrderRepository`](order::OrderRepository) - Customer orders
//! - [`PaymentRepository`](payment::PaymentRepository) - Control numbers and webhooks
//! - [`FulfillmentService`](fulfillment::FulfillmentService) - Post-payment side effects
//! - [`LicenseRepository`](license::LicenseRepository) - License key pool
//! - [`ShipmentRepository`](shipment::ShipmentRepository) - Shipment requests
//! - [`RbacRepository`](rbac::RbacRepository) - Capability checks
//! - [`OtpRepository`](otp::OtpRepository) - One-time passwords

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::DbResult;

pub mod catalog;
pub mod fulfillment;
pub mod inventory;
pub(crate) mod ledger;
pub mod license;
pub mod order;
pub mod otp;
pub mod payment;
pub mod purchasing;
pub mod rbac;
pub mod reception;
pub mod sale;
pub mod shipment;

/// Takes the write lock by touching the rows matching `key = value`.
///
/// SQLite has no `SELECT ... FOR UPDATE`. A no-op UPDATE as the first
/// statement of a transaction acquires the database write lock (waiting up
/// to the busy timeout), after which every read in the transaction sees
/// state no other writer can change until commit.
///
/// Returns whether any row matched. `table` and `key` must be static
/// identifiers.
pub(crate) async fn lock_rows(
    conn: &mut SqliteConnection,
    table: &'static str,
    key: &'static str,
    value: &str,
) -> DbResult<bool> {
    let sql = format!("UPDATE {table} SET updated_at = updated_at WHERE {key} = ?1");
    let result = sqlx::query(&sql).bind(value).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Takes the write lock through the `number_series` row for `series`.
///
/// Used where there is no existing row to touch: generating the next PO
/// number or a fresh SKU.
pub(crate) async fn lock_series(conn: &mut SqliteConnection, series: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO number_series (series, touched_at) VALUES (?1, ?2)
        ON CONFLICT(series) DO UPDATE SET touched_at = excluded.touched_at
        "#,
    )
    .bind(series)
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}
