//! # Purchasing
//!
//! Purchase orders, their lines, stock receptions and the pure rules that
//! govern them: PO numbering, reception reconciliation and totals.
//!
//! ## Reception Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PurchaseOrderItem: quantity_ordered = 100                              │
//! │                                                                         │
//! │  Reception #1  received 60, decayed 10   → accounted  70               │
//! │  Reception #2  received 30, decayed  0   → accounted 100  ✓            │
//! │  Reception #3  received  1, decayed  0   → 101 > 100                   │
//! │                                          → OverOrderedQuantity (+1)   │
//! │                                                                         │
//! │  Stock gains the received units (60, then 30); decayed units are        │
//! │  counted against the order but never posted to the ledger.              │
//! │                                                                         │
//! │  Checks run in order and stop at the first failure:                    │
//! │    1. received == 0 && decayed == 0      → EmptyReception              │
//! │    2. decayed > received                 → DecayExceedsReceived        │
//! │    3. prior + received + decayed > ordered → OverOrderedQuantity       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## PO Numbers
//! `#ORD-<year>-<seq>` with a 4-digit zero-padded sequence that restarts
//! every calendar year.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ValidationError;
use crate::money::Money;
use crate::validation::ValidationResult;

// =============================================================================
// Purchase Order Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoStatus {
    #[default]
    Draft,
    Sent,
    ReceivedPartial,
    ReceivedFull,
    Cancelled,
}

impl PoStatus {
    /// Whether goods may still be booked in against this order.
    pub fn accepts_receptions(&self) -> bool {
        !matches!(self, PoStatus::Cancelled)
    }
}

impl fmt::Display for PoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoStatus::Draft => "DRAFT",
            PoStatus::Sent => "SENT",
            PoStatus::ReceivedPartial => "RECEIVED_PARTIAL",
            PoStatus::ReceivedFull => "RECEIVED_FULL",
            PoStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseOrder {
    pub id: String,
    pub po_number: String,
    pub supplier_id: String,
    pub po_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub status: PoStatus,
    /// Always recomputed from the lines, never taken from input.
    pub order_total_cents: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    #[inline]
    pub fn order_total(&self) -> Money {
        Money::from_cents(self.order_total_cents)
    }
}

/// A PO line. Unique per (purchase order, sku).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseOrderItem {
    pub id: String,
    pub purchase_order_id: String,
    pub sku: String,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl PurchaseOrderItem {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }
}

/// One delivery booked against a PO line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockReception {
    pub id: String,
    pub purchase_order_item_id: String,
    pub quantity_received: i64,
    pub decayed_products: i64,
    pub received_by: String,
    pub reception_date: DateTime<Utc>,
}

impl StockReception {
    /// `quantity_received - decayed_products`.
    ///
    /// A reporting figure only. The ledger is posted with the full
    /// `quantity_received`; decayed units are counted apart from it and
    /// never posted.
    pub fn quantity_remained_for_sale(&self) -> i64 {
        self.quantity_received - self.decayed_products
    }

    /// Units this reception consumes from the ordered quantity.
    pub fn accounted(&self) -> i64 {
        self.quantity_received + self.decayed_products
    }

    /// Ledger reference for the RESTOCK movements of this reception.
    pub fn ledger_reference(&self) -> String {
        format!("RECEPTION-{}", self.id)
    }
}

/// Reception totals for one PO line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceptionStatus {
    pub purchase_order_item_id: String,
    pub sku: String,
    pub quantity_ordered: i64,
    pub total_received: i64,
    pub total_decayed: i64,
    /// Σ [`StockReception::quantity_remained_for_sale`] over the line.
    pub total_remained_for_sale: i64,
    pub quantity_remained_unreceived: i64,
}

// =============================================================================
// Inputs
// =============================================================================

/// A submitted PO line. `id` is set when it refers to an existing line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    #[serde(default)]
    pub id: Option<String>,
    pub sku: String,
    pub quantity_ordered: i64,
    pub unit_cost_cents: i64,
}

impl PurchaseOrderLine {
    pub fn new(sku: impl Into<String>, quantity_ordered: i64, unit_cost: Money) -> Self {
        PurchaseOrderLine {
            id: None,
            sku: sku.into(),
            quantity_ordered,
            unit_cost_cents: unit_cost.cents(),
        }
    }

    /// Targets an existing line.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl crate::diff::Identified for PurchaseOrderLine {
    fn identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: String,
    pub created_by: String,
    /// Defaults to today.
    #[serde(default)]
    pub po_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_delivery_date: Option<NaiveDate>,
    pub items: Vec<PurchaseOrderLine>,
}

/// Replacement state for an existing PO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderUpdate {
    #[serde(default)]
    pub expected_delivery_date: Option<NaiveDate>,
    pub items: Vec<PurchaseOrderLine>,
}

// =============================================================================
// PO Numbering
// =============================================================================

/// `#ORD-<year>-`
pub fn po_number_prefix(year: i32) -> String {
    format!("#ORD-{}-", year)
}

/// `#ORD-<year>-<seq:04>`
pub fn format_po_number(year: i32, seq: u32) -> String {
    format!("{}{:04}", po_number_prefix(year), seq)
}

/// Extracts the sequence of a PO number issued in `year`.
pub fn parse_po_sequence(po_number: &str, year: i32) -> Option<u32> {
    po_number
        .strip_prefix(&po_number_prefix(year))
        .filter(|seq| !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|seq| seq.parse().ok())
}

/// Next PO number after the highest one issued this year.
///
/// ## Example
/// ```rust
/// use duka_core::purchasing::next_po_number;
///
/// assert_eq!(next_po_number(2026, None), "#ORD-2026-0001");
/// assert_eq!(next_po_number(2026, Some("#ORD-2026-0041")), "#ORD-2026-0042");
/// ```
pub fn next_po_number(year: i32, highest: Option<&str>) -> String {
    let last = highest
        .and_then(|n| parse_po_sequence(n, year))
        .unwrap_or(0);
    format_po_number(year, last + 1)
}

// =============================================================================
// Reception Rules
// =============================================================================

/// Validates one reception against its line.
///
/// `prior_accounted` is `Σ(received + decayed)` over every OTHER reception
/// of the same line (the record being edited is excluded on update).
pub fn check_reception(
    quantity_ordered: i64,
    prior_accounted: i64,
    quantity_received: i64,
    decayed_products: i64,
) -> ValidationResult<()> {
    if quantity_received < 0 {
        return Err(ValidationError::OutOfRange {
            field: "quantity_received".to_string(),
            min: 0,
            max: quantity_ordered,
        });
    }
    if decayed_products < 0 {
        return Err(ValidationError::OutOfRange {
            field: "decayed_products".to_string(),
            min: 0,
            max: quantity_ordered,
        });
    }

    if quantity_received == 0 && decayed_products == 0 {
        return Err(ValidationError::EmptyReception {
            field: "quantity_received".to_string(),
        });
    }

    if decayed_products > quantity_received {
        return Err(ValidationError::DecayExceedsReceived {
            field: "decayed_products".to_string(),
            received: quantity_received,
            decayed: decayed_products,
        });
    }

    let accounted = prior_accounted
        .checked_add(quantity_received)
        .and_then(|n| n.checked_add(decayed_products))
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "quantity_received".to_string(),
            min: 0,
            max: quantity_ordered,
        })?;
    if accounted > quantity_ordered {
        return Err(ValidationError::OverOrderedQuantity {
            field: "quantity_received".to_string(),
            ordered: quantity_ordered,
            already_accounted: prior_accounted,
            excess: accounted - quantity_ordered,
        });
    }

    Ok(())
}

/// `quantity_ordered - total_accounted`, floored at 0.
pub fn quantity_remained_unreceived(quantity_ordered: i64, total_accounted: i64) -> i64 {
    (quantity_ordered - total_accounted).max(0)
}

/// PO status implied by the reception totals of its lines.
///
/// `lines` yields `(quantity_ordered, total_accounted)` per line.
pub fn receiving_status(lines: impl IntoIterator<Item = (i64, i64)>) -> PoStatus {
    let mut any = false;
    let mut all_full = true;
    for (ordered, accounted) in lines {
        if accounted > 0 {
            any = true;
        }
        if accounted < ordered {
            all_full = false;
        }
    }
    match (any, all_full) {
        (true, true) => PoStatus::ReceivedFull,
        (true, false) => PoStatus::ReceivedPartial,
        (false, _) => PoStatus::Sent,
    }
}

// =============================================================================
// Order Validation & Totals
// =============================================================================

/// `expected_delivery_date` must not precede `po_date`.
pub fn validate_po_dates(po_date: NaiveDate, expected: Option<NaiveDate>) -> ValidationResult<()> {
    if let Some(expected) = expected {
        if expected < po_date {
            return Err(ValidationError::DateOrder {
                field: "expected_delivery_date".to_string(),
                later: expected.to_string(),
                earlier_field: "po_date".to_string(),
                earlier: po_date.to_string(),
            });
        }
    }
    Ok(())
}

/// Non-empty, bounded quantities and costs, one line per SKU.
pub fn validate_po_lines(lines: &[PurchaseOrderLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Empty {
            field: "items".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for line in lines {
        crate::validation::validate_sku(&line.sku)?;
        if line.quantity_ordered <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity_ordered".to_string(),
            });
        }
        if line.quantity_ordered > crate::MAX_LINE_QUANTITY {
            return Err(ValidationError::OutOfRange {
                field: "quantity_ordered".to_string(),
                min: 1,
                max: crate::MAX_LINE_QUANTITY,
            });
        }
        crate::validation::validate_price_cents("unit_cost", line.unit_cost_cents)?;
        if !seen.insert(line.sku.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "items.sku".to_string(),
                value: line.sku.clone(),
            });
        }
    }
    Ok(())
}

/// `Σ unit_cost × quantity_ordered`; `OutOfRange` on overflow.
pub fn order_total<'a>(
    lines: impl IntoIterator<Item = &'a PurchaseOrderLine>,
) -> ValidationResult<Money> {
    Money::checked_total(
        "order_total",
        lines
            .into_iter()
            .map(|l| (Money::from_cents(l.unit_cost_cents), l.quantity_ordered)),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
