//! Fixtures shared by the repository tests.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use duka_core::fulfillment::{NewOrder, NewOrderDigitalLine, NewOrderPhysicalLine, Order};
use duka_core::payment::{ControlNumberGrant, ControlNumberRequest, PaymentStatus};
use duka_core::purchasing::{NewPurchaseOrder, PurchaseOrderLine};
use duka_core::{Money, MovementType, NewStockMovement};
use uuid::Uuid;

use crate::gateway::{GatewayError, PaymentGateway};
use crate::notify::Notifier;
use crate::pool::{Database, DbConfig};
use crate::repository::ledger;

pub(crate) const CUSTOMER_PHONE: &str = "+255712345678";

/// Fresh in-memory database with migrations applied.
pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// Removes the database file and its WAL siblings.
pub(crate) struct TempDbFile(PathBuf);

impl Drop for TempDbFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

/// File-backed database with several connections, for tests that race
/// writers against each other.
pub(crate) async fn file_db() -> (Database, TempDbFile) {
    file_db_with(|config| config).await
}

/// [`file_db`] with extra pool settings, e.g. a short busy timeout.
pub(crate) async fn file_db_with(configure: impl FnOnce(DbConfig) -> DbConfig) -> (Database, TempDbFile) {
    let path = std::env::temp_dir().join(format!("duka-test-{}.db", Uuid::new_v4()));
    let db = Database::new(configure(DbConfig::new(&path).max_connections(8)))
        .await
        .unwrap();
    (db, TempDbFile(path))
}

/// Inserts a specification and inventory row for `sku`, with an opening
/// ADJUST when `quantity` is positive.
pub(crate) async fn seed_sku(db: &Database, sku: &str, quantity: i64) -> String {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO product_specifications (
            id, sku, product_name, brand, category, original_price_cents,
            sale_price_cents, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 'Test', 'Test', 1000, 900, ?4, ?4)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(sku)
    .bind(format!("Item {sku}"))
    .bind(now)
    .execute(db.pool())
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO inventory (sku, quantity_in_stock, safety_stock_level, created_at, updated_at) VALUES (?1, 0, 5, ?2, ?2)",
    )
    .bind(sku)
    .bind(now)
    .execute(db.pool())
    .await
    .unwrap();

    if quantity > 0 {
        let mut tx = db.pool().begin().await.unwrap();
        let opening = NewStockMovement::new(sku, MovementType::Adjust, quantity)
            .reference("Opening balance")
            .performed_by("test");
        ledger::apply_movement(&mut tx, &opening).await.unwrap();
        tx.commit().await.unwrap();
    }

    sku.to_string()
}

pub(crate) fn new_po(lines: &[(&str, i64, i64)]) -> NewPurchaseOrder {
    NewPurchaseOrder {
        supplier_id: "supplier-1".to_string(),
        created_by: "buyer-1".to_string(),
        po_date: None,
        expected_delivery_date: None,
        items: lines
            .iter()
            .map(|(sku, qty, cost)| PurchaseOrderLine::new(*sku, *qty, Money::from_cents(*cost)))
            .collect(),
    }
}

/// `physical` and `digital` are `(sku or product id, quantity, unit price cents)`.
pub(crate) fn new_order(physical: &[(&str, i64, i64)], digital: &[(&str, i64, i64)]) -> NewOrder {
    NewOrder {
        customer_id: "customer-1".to_string(),
        customer_phone: CUSTOMER_PHONE.to_string(),
        physical_items: physical
            .iter()
            .map(|(sku, quantity, price)| NewOrderPhysicalLine {
                sku: sku.to_string(),
                quantity: *quantity,
                unit_price_cents: *price,
            })
            .collect(),
        digital_items: digital
            .iter()
            .map(|(id, quantity, price)| NewOrderDigitalLine {
                digital_product_id: id.to_string(),
                quantity: *quantity,
                unit_price_cents: *price,
            })
            .collect(),
    }
}

/// Creates a digital product with `keys` in its pool; returns the product id.
pub(crate) async fn digital_with_keys(db: &Database, name: &str, keys: &[&str]) -> String {
    let product = db.catalog().create_digital_product(name).await.unwrap();
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    db.licenses().load_keys(&product.id, &keys).await.unwrap();
    product.id
}

/// A PENDING order for one unit of a digital product.
pub(crate) async fn digital_order(db: &Database, product_id: &str) -> Order {
    db.orders()
        .create_order(new_order(&[], &[(product_id, 1, 2_500)]))
        .await
        .unwrap()
}

/// Records a SUCCESS payment for the order's full total without going
/// through the gateway, leaving fulfillment to the caller.
pub(crate) async fn record_success_payment(db: &Database, order: &Order) {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, order_id, amount_due_cents, status, transaction_id,
            payment_method, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'GePG', ?6, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&order.id)
    .bind(order.order_total_cents)
    .bind(PaymentStatus::Success)
    .bind(format!("TX-{}", Uuid::new_v4().simple()))
    .bind(now)
    .execute(db.pool())
    .await
    .unwrap();
}

/// Keeps every message instead of sending it.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, phone_number: &str, message: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((phone_number.to_string(), message.to_string()));
        true
    }
}

/// Gateway double that always fails or issues already-expired numbers.
#[derive(Debug)]
pub(crate) enum ScriptedGateway {
    Failing,
    Expired,
}

impl ScriptedGateway {
    pub(crate) fn failing() -> Self {
        ScriptedGateway::Failing
    }

    pub(crate) fn expired() -> Self {
        ScriptedGateway::Expired
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_control_number(
        &self,
        _request: &ControlNumberRequest,
    ) -> Result<ControlNumberGrant, GatewayError> {
        match self {
            ScriptedGateway::Failing => Err(GatewayError::Unavailable("connection refused".into())),
            ScriptedGateway::Expired => Ok(ControlNumberGrant {
                control_number: format!("CN-EXP-{}", Uuid::new_v4().simple()),
                expiry_time: Utc::now() - Duration::minutes(1),
                raw_response: serde_json::json!({ "status": "success" }),
            }),
        }
    }
}

