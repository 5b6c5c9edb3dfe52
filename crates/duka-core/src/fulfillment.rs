//! # Orders & Fulfillment
//!
//! Customer orders settled through control-number payments, and what
//! happens to them once paid: license keys for digital lines, shipments
//! for physical lines.
//!
//! ```text
//! Order (PENDING) ──payment SUCCESS──► PAID ──delivered──► FULFILLED
//!    │                                  │
//!    │                                  ├─► SoftwareLicense × digital lines
//!    │                                  ├─► ShipmentRequest → Shipment
//!    │                                  └─► SALE movements (stock finalization)
//!    └──cancel──► CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Fulfilled,
    Completed,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Fulfilled => "FULFILLED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// `ORD-<year>-<6 digits>`
    pub order_number: String,
    pub customer_id: String,
    pub customer_phone: String,
    pub status: OrderStatus,
    pub order_total_cents: i64,
    /// No physical lines at all.
    pub is_digital: bool,
    pub order_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn order_total(&self) -> Money {
        Money::from_cents(self.order_total_cents)
    }

    /// Ledger reference for stock finalization of this order.
    pub fn ledger_reference(&self) -> String {
        format!("ORDER-{}", self.order_number)
    }
}

/// `ORD-<year>-<n:06>`
pub fn format_order_number(year: i32, n: u32) -> String {
    format!("ORD-{}-{:06}", year, n % 1_000_000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItemPhysical {
    pub id: String,
    pub order_id: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItemDigital {
    pub id: String,
    pub order_id: String,
    pub digital_product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderPhysicalLine {
    pub sku: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderDigitalLine {
    pub digital_product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: String,
    pub customer_phone: String,
    #[serde(default)]
    pub physical_items: Vec<NewOrderPhysicalLine>,
    #[serde(default)]
    pub digital_items: Vec<NewOrderDigitalLine>,
}

impl NewOrder {
    /// Physical and digital lines together; `OutOfRange` on overflow.
    pub fn total_amount(&self) -> Result<Money, ValidationError> {
        let physical = self
            .physical_items
            .iter()
            .map(|l| (Money::from_cents(l.unit_price_cents), l.quantity));
        let digital = self
            .digital_items
            .iter()
            .map(|l| (Money::from_cents(l.unit_price_cents), l.quantity));
        Money::checked_total("order_total", physical.chain(digital))
    }
}

// =============================================================================
// Licensing
// =============================================================================

/// A pre-generated license key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SoftwareLicense {
    pub id: String,
    pub digital_product_id: String,
    pub license_key: String,
    pub is_assigned: bool,
    pub assigned_to_order: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A customer's right to use a digital product bought in an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CustomerDigitalAccess {
    pub id: String,
    pub customer_id: String,
    pub digital_product_id: String,
    pub order_id: String,
    pub access_granted_at: DateTime<Utc>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

// =============================================================================
// Shipping
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    #[default]
    Pending,
    Packing,
    Dispatched,
    Delivered,
    Failed,
}

impl ShipmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Failed)
    }

    /// Forward-only: PENDING → PACKING → DISPATCHED → DELIVERED, and any
    /// non-terminal state may fail.
    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Pending, Packing) | (Packing, Dispatched) | (Dispatched, Delivered) => true,
            // Small parcels skip packing.
            (Pending, Dispatched) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShipmentStatus::Pending => "PENDING",
            ShipmentStatus::Packing => "PACKING",
            ShipmentStatus::Dispatched => "DISPATCHED",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShipmentRequest {
    pub id: String,
    pub order_id: String,
    pub requested_at: DateTime<Utc>,
    pub is_fulfilled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Shipment {
    pub id: String,
    pub request_id: String,
    pub shipping_method: String,
    pub tracking_number: Option<String>,
    pub status: ShipmentStatus,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShipmentLineItem {
    pub id: String,
    pub shipment_id: String,
    pub order_item_id: String,
    pub quantity: i64,
}

/// A shipment request with everything created for it.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentPlan {
    pub request: ShipmentRequest,
    pub shipments: Vec<Shipment>,
    pub line_items: Vec<ShipmentLineItem>,
    /// False when an earlier call had already created the request.
    pub created: bool,
}

// =============================================================================
// Fulfillment Report
// =============================================================================

/// What post-payment fulfillment did for one order.
///
/// Failures are collected here instead of aborting; the payment that
/// triggered fulfillment is already committed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FulfillmentReport {
    pub order_id: String,
    pub order_marked_paid: bool,
    pub licenses_assigned: Vec<String>,
    pub shipment_request_id: Option<String>,
    pub stock_finalized: bool,
    pub confirmation_sent: bool,
    pub failures: Vec<String>,
}

impl FulfillmentReport {
    pub fn new(order_id: impl Into<String>) -> Self {
        FulfillmentReport {
            order_id: order_id.into(),
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_number_format() {
        assert_eq!(format_order_number(2026, 42), "ORD-2026-000042");
        assert_eq!(format_order_number(2026, 999_999), "ORD-2026-999999");
    }

    #[test]
    fn test_shipment_transitions() {
        use ShipmentStatus::*;
        assert!(Pending.can_transition_to(Packing));
        assert!(Packing.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Delivered));
        assert!(Dispatched.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Dispatched.can_transition_to(Packing));
    }

    #[test]
    fn test_order_total_sums_both_kinds() {
        let order = NewOrder {
            customer_id: "c".to_string(),
            customer_phone: "+255700000000".to_string(),
            physical_items: vec![NewOrderPhysicalLine {
                sku: "A".to_string(),
                quantity: 2,
                unit_price_cents: 1_000,
            }],
            digital_items: vec![NewOrderDigitalLine {
                digital_product_id: "d".to_string(),
                quantity: 1,
                unit_price_cents: 4_999,
            }],
        };
        assert_eq!(order.total_amount().unwrap().cents(), 6_999);
    }
}
