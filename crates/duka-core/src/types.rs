//! # Domain Types
//!
//! Catalog, inventory, ledger and point-of-sale types.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐  1:1  ┌─────────────────┐  1:N  ┌──────────┐ │
//! │  │ ProductSpecification │──────►│    Inventory    │──────►│  Stock   │ │
//! │  │  sku (business key)  │       │ quantity_in_    │       │ Movement │ │
//! │  │  brand/category/color│       │ stock (cache)   │       │ (ledger) │ │
//! │  └──────────────────────┘       └─────────────────┘       └──────────┘ │
//! │                                         ▲                     ▲        │
//! │  ┌─────────────────┐                    │ SALE -qty           │        │
//! │  │      Sale       │────────────────────┴─────────────────────┘        │
//! │  │  SaleItem × N   │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ledger Invariant
//! `Inventory.quantity_in_stock == Σ StockMovement.quantity_change` for the
//! SKU. The counter is a materialized cache of the append-only ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Catalog
// =============================================================================

/// A sellable variant of a product, identified by its SKU.
///
/// The SKU is generated once at creation and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductSpecification {
    pub id: String,
    pub sku: String,
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub color: Option<String>,
    pub original_price_cents: i64,
    pub sale_price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductSpecification {
    /// Returns the current selling price.
    #[inline]
    pub fn sale_price(&self) -> Money {
        Money::from_cents(self.sale_price_cents)
    }
}

/// Input for creating a product specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSpecification {
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub color: Option<String>,
    pub original_price_cents: i64,
    pub sale_price_cents: i64,
    /// Falls back to the configured default when absent.
    pub safety_stock_level: Option<i64>,
    pub location: Option<String>,
}

/// A product delivered as a license key rather than a physical unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DigitalProduct {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Inventory
// =============================================================================

/// Per-SKU stock counter.
///
/// Only the inventory ledger writes `quantity_in_stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Inventory {
    pub sku: String,
    pub quantity_in_stock: i64,
    /// Reorder threshold.
    pub safety_stock_level: i64,
    /// Warehouse location code.
    pub location: Option<String>,
    pub last_restock_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    /// True when stock is at or below the safety level.
    pub fn is_low_stock(&self) -> bool {
        self.quantity_in_stock <= self.safety_stock_level
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Units left through a sale or a paid order.
    Sale,
    /// Units came back from a customer.
    Return,
    /// Units arrived from a supplier.
    Restock,
    /// Manual correction (count, damage, opening balance).
    Adjust,
    /// Units moved between locations.
    Transfer,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "SALE",
            MovementType::Return => "RETURN",
            MovementType::Restock => "RESTOCK",
            MovementType::Adjust => "ADJUST",
            MovementType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row of the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub sku: String,
    pub movement_type: MovementType,
    /// Signed change: negative leaves stock, positive adds to it.
    pub quantity_change: i64,
    pub unit_cost_cents: i64,
    /// Business reference ("SALE-<id>", "RECEPTION-<id>", adjustment reason).
    pub reference_id: Option<String>,
    pub performed_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StockMovement {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }
}

/// A movement the ledger is asked to apply.
///
/// ## Example
/// ```rust
/// use duka_core::{MovementType, NewStockMovement};
///
/// let movement = NewStockMovement::new("SAM-PH-BLK", MovementType::Sale, -2)
///     .reference("SALE-42")
///     .performed_by("agent-7");
/// assert_eq!(movement.quantity_change, -2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockMovement {
    pub sku: String,
    pub movement_type: MovementType,
    pub quantity_change: i64,
    pub unit_cost_cents: i64,
    pub reference_id: Option<String>,
    pub performed_by: Option<String>,
}

impl NewStockMovement {
    pub fn new(sku: impl Into<String>, movement_type: MovementType, quantity_change: i64) -> Self {
        NewStockMovement {
            sku: sku.into(),
            movement_type,
            quantity_change,
            unit_cost_cents: 0,
            reference_id: None,
            performed_by: None,
        }
    }

    pub fn unit_cost(mut self, cost: Money) -> Self {
        self.unit_cost_cents = cost.cents();
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_id = Some(reference.into());
        self
    }

    pub fn performed_by(mut self, user: impl Into<String>) -> Self {
        self.performed_by = Some(user.into());
        self
    }

    /// True when this movement should stamp `last_restock_date`.
    pub fn is_restock_receipt(&self) -> bool {
        self.movement_type == MovementType::Restock && self.quantity_change > 0
    }
}

/// Result of comparing the cached counter with the ledger sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub sku: String,
    pub cached: i64,
    pub ledger_sum: i64,
}

impl LedgerCheck {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.ledger_sum
    }
}

// =============================================================================
// Sales
// =============================================================================

/// The status of a point-of-sale transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    #[default]
    Completed,
    Cancelled,
    Refunded,
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaleStatus::Completed => "COMPLETED",
            SaleStatus::Cancelled => "CANCELLED",
            SaleStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// How the customer paid at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalePaymentMethod {
    #[default]
    Cash,
    Card,
    /// Mobile money.
    Momo,
    Transfer,
    Other,
}

/// Settlement state of a counter sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalePaymentStatus {
    Pending,
    #[default]
    Paid,
    Failed,
    Refunded,
}

/// A committed point-of-sale transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub sale_date: DateTime<Utc>,
    pub total_amount_cents: i64,
    pub customer_id: Option<String>,
    pub sales_outlet: Option<String>,
    pub sales_agent: String,
    pub status: SaleStatus,
    pub payment_method: SalePaymentMethod,
    pub payment_status: SalePaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }

    /// Ledger reference for the movements this sale produced.
    pub fn ledger_reference(&self) -> String {
        sale_reference(&self.id)
    }
}

/// `SALE-<sale_id>`
pub fn sale_reference(sale_id: &str) -> String {
    format!("SALE-{}", sale_id)
}

/// A line of a sale. Unique per (sale, sku).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_measure: Option<String>,
}

impl SaleItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// A requested sale line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSaleLine {
    pub sku: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_measure: Option<String>,
}

impl NewSaleLine {
    pub fn new(sku: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        NewSaleLine {
            sku: sku.into(),
            quantity,
            unit_price_cents: unit_price.cents(),
            unit_measure: None,
        }
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Everything needed to ring up one sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSale {
    pub items: Vec<NewSaleLine>,
    pub customer_id: Option<String>,
    pub sales_outlet: Option<String>,
    pub sales_agent: String,
    #[serde(default)]
    pub payment_method: SalePaymentMethod,
    #[serde(default)]
    pub payment_status: SalePaymentStatus,
}

impl NewSale {
    /// `Σ quantity × unit_price` over the lines; `OutOfRange` on overflow.
    pub fn total_amount(&self) -> Result<Money, ValidationError> {
        Money::checked_total(
            "total_amount",
            self.items.iter().map(|l| (l.unit_price(), l.quantity)),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
