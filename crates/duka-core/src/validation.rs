//! # Validation Module
//!
//! Input validation shared by every repository.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request handler (outside this workspace)                      │
//! │  └── Deserialization, authentication, capability check                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + domain rules (purchasing, payment)             │
//! │  ├── Field formats (SKU, phone, actor)                                 │
//! │  └── Collection rules (non-empty, one line per SKU)                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quantity_in_stock >= 0)                                    │
//! │  ├── UNIQUE constraints                                                │
//! │  └── Append-only triggers on stock_movements                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use duka_core::validation::{validate_sku, validate_quantity};
//!
//! validate_sku("SAM-PH-BLA").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::NewSaleLine;
use crate::{MAX_LINES_PER_DOCUMENT, MAX_LINE_QUANTITY, MAX_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use duka_core::validation::validate_sku;
///
/// assert!(validate_sku("SAM-PH-BLA-01").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name: required, at most 200 characters.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "product_name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "product_name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a phone number in international form (`+255712345678`).
///
/// A leading `+` is optional; 9 to 15 digits follow it.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "phone_number".to_string(),
        });
    }

    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if !(9..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone_number".to_string(),
            reason: "expected 9 to 15 digits, optionally prefixed with '+'".to_string(),
        });
    }

    Ok(())
}

/// Validates a free-text actor reference (`performed_by`, `received_by`, ...).
pub fn validate_actor(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.len() > 100 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 100,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed [`MAX_LINE_QUANTITY`]
///
/// ```text
/// validate_quantity(qty)
///   ├── qty <= 0?          → MustBePositive
///   ├── qty > 100_000?     → OutOfRange
///   └── OK
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price or cost in cents. Zero is allowed (free items).
///
/// The [`MAX_PRICE_CENTS`] ceiling keeps `price × quantity` summed over a
/// full document inside `i64`.
///
/// ## Example
/// ```rust
/// use duka_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("unit_price", 1099).is_ok());
/// assert!(validate_price_cents("unit_price", 0).is_ok());
/// assert!(validate_price_cents("unit_price", -100).is_err());
/// assert!(validate_price_cents("unit_price", i64::MAX / 2).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the lines of a point-of-sale transaction.
///
/// Non-empty, bounded in size, valid SKUs and quantities, and one line per
/// SKU since a sale stores at most one item per specification.
pub fn validate_sale_lines(lines: &[NewSaleLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Empty {
            field: "items".to_string(),
        });
    }

    if lines.len() > MAX_LINES_PER_DOCUMENT {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_LINES_PER_DOCUMENT as i64,
        });
    }

    let mut seen = HashSet::new();
    for line in lines {
        validate_sku(&line.sku)?;
        validate_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price_cents)?;
        if !seen.insert(line.sku.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "items.sku".to_string(),
                value: line.sku.clone(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("SAM-PH-BLA").is_ok());
        assert!(validate_sku("ABC123").is_ok());
        assert!(validate_sku("product_1").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+255712345678").is_ok());
        assert!(validate_phone("0712345678").is_ok());
        assert!(validate_phone("").is_err());
        assert!(validate_phone("+25571234abcd").is_err());
        assert!(validate_phone("12345").is_err());
    }

    #[test]
    fn test_validate_sale_lines_rejects_duplicates_and_empty() {
        assert_eq!(
            validate_sale_lines(&[]),
            Err(ValidationError::Empty {
                field: "items".to_string()
            })
        );

        let lines = vec![
            NewSaleLine::new("A-1", 1, Money::from_cents(100)),
            NewSaleLine::new("A-1", 2, Money::from_cents(100)),
        ];
        assert!(matches!(
            validate_sale_lines(&lines),
            Err(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_validate_price_cents_names_field() {
        assert_eq!(
            validate_price_cents("unit_cost", -1),
            Err(ValidationError::OutOfRange {
                field: "unit_cost".to_string(),
                min: 0,
                max: MAX_PRICE_CENTS,
            })
        );
        assert!(validate_price_cents("unit_cost", MAX_PRICE_CENTS).is_ok());
        assert!(validate_price_cents("unit_cost", MAX_PRICE_CENTS + 1).is_err());
    }

    #[test]
    fn test_sale_line_price_ceiling() {
        let lines = vec![NewSaleLine::new("A-1", 3, Money::from_cents(i64::MAX / 2))];
        assert!(matches!(
            validate_sale_lines(&lines),
            Err(ValidationError::OutOfRange { max: MAX_PRICE_CENTS, .. })
        ));
    }
}
