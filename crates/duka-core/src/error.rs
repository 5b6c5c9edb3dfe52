//! # Error Types
//!
//! Domain-specific error types for duka-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  duka-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule and domain failures              │
//! │  └── ValidationError  - Field-scoped input failures                    │
//! │                                                                         │
//! │  duka-db errors (separate crate)                                       │
//! │  └── DbError          - Storage, locking, gateway failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → request layer           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, quantities)
//! 3. Errors are enum variants, never String
//! 4. Every validation variant names the offending field

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They are never retried automatically.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Insufficient stock to complete a stock-decreasing movement.
    ///
    /// ## When This Occurs
    /// - A sale line asks for more than is on hand
    /// - A manual removal is larger than the stock
    /// - Order stock finalization runs after the shelf was emptied
    ///
    /// ## User Workflow
    /// ```text
    /// Sale line (qty: 5)
    ///      │
    ///      ▼
    /// Lock inventory row: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "SAM-PH-BLK", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole sale rolled back, nothing committed
    /// ```
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// No unassigned license key is left for a digital product.
    #[error("No license available for digital product {digital_product_id}")]
    NoLicenseAvailable { digital_product_id: String },

    /// An entity is not in a state that allows the requested change.
    ///
    /// ## When This Occurs
    /// - Requesting a control number for an order that is not PENDING
    /// - Refunding a sale twice
    /// - Moving a delivered shipment back to PACKING
    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    /// A post-payment fulfillment step failed.
    ///
    /// The payment stays SUCCESS; an operator has to follow up.
    #[error("Fulfillment failed for order {order_id}: {reason}")]
    Fulfillment { order_id: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shorthand for an invalid state transition.
    pub fn invalid_transition(
        entity: impl Into<String>,
        id: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        CoreError::InvalidTransition {
            entity: entity.into(),
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements or violates a
/// stated business rule. Each one names the field it is about.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Invalid format (e.g., invalid UUID, invalid amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., the same SKU twice in one sale).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// A collection that must carry at least one element is empty.
    #[error("{field} must contain at least one entry")]
    Empty { field: String },

    /// A reception that records neither received nor decayed units.
    #[error("{field}: quantity received and decayed products cannot both be zero")]
    EmptyReception { field: String },

    /// More decayed units than were received in the same batch.
    #[error("{field}: decayed products ({decayed}) cannot exceed quantity received ({received})")]
    DecayExceedsReceived {
        field: String,
        received: i64,
        decayed: i64,
    },

    /// Receptions would account for more units than were ordered.
    ///
    /// ## Example
    /// ```text
    /// ordered = 100, already accounted = 100, new reception = (1, 0)
    ///      │
    ///      ▼
    /// OverOrderedQuantity { ordered: 100, already_accounted: 100, excess: 1 }
    /// ```
    #[error(
        "{field}: receiving exceeds ordered quantity {ordered} by {excess} \
         (already accounted {already_accounted})"
    )]
    OverOrderedQuantity {
        field: String,
        ordered: i64,
        already_accounted: i64,
        excess: i64,
    },

    /// Two dates are in the wrong order.
    #[error("{field} ({later}) must not precede {earlier_field} ({earlier})")]
    DateOrder {
        field: String,
        later: String,
        earlier_field: String,
        earlier: String,
    },

    /// The action is not allowed in the entity's current state.
    #[error("{field}: {reason}")]
    NotAllowed { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "SAM-PH-BLK".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SAM-PH-BLK: available 3, requested 5"
        );
    }

    #[test]
    fn test_over_ordered_message_reports_excess() {
        let err = ValidationError::OverOrderedQuantity {
            field: "quantity_received".to_string(),
            ordered: 100,
            already_accounted: 100,
            excess: 1,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("quantity_received"));
        assert!(msg.contains("by 1"));
    }

    #[test]
    fn test_invalid_transition_helper() {
        let err = CoreError::invalid_transition("Payment", "p-1", "SUCCESS", "EXPIRED");
        assert_eq!(err.to_string(), "Payment p-1 cannot move from SUCCESS to EXPIRED");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "sku".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
