//! # duka-core: Pure Business Logic for the Duka back office
//!
//! Domain types and rules for stock accounting, purchasing, point-of-sale,
//! control-number payments and fulfillment. Nothing in here touches a
//! database or the network; `duka-db` does the I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Duka Architecture                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Request handlers (HTTP, admin, webhooks)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                duka-db (Transactions & Repositories)            │   │
//! │  │  ledger · receptions · POs · sales · payments · fulfillment     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ duka-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   types · money · purchasing · payment · fulfillment            │   │
//! │  │   access · diff · sku · validation · error                      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Catalog, inventory, ledger and sale types
//! - [`money`] - Fixed-point two-decimal money as integer cents
//! - [`purchasing`] - Purchase orders, receptions and the reconciliation rules
//! - [`payment`] - Payment state machine and webhook shapes
//! - [`fulfillment`] - Orders, licenses and shipments
//! - [`access`] - Capabilities, user context, OTP shapes
//! - [`diff`] - Identifier-based child collection reconciliation
//! - [`sku`] - SKU derivation
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use duka_core::purchasing::check_reception;
//!
//! // 100 ordered, 60 received with 10 decayed, then 30 more.
//! assert!(check_reception(100, 0, 60, 10).is_ok());
//! assert!(check_reception(100, 70, 30, 0).is_ok());
//!
//! // Everything is accounted for; one more unit is over-ordered.
//! assert!(check_reception(100, 100, 1, 0).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod diff;
pub mod error;
pub mod fulfillment;
pub mod money;
pub mod payment;
pub mod purchasing;
pub mod sku;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity on a single sale, order or PO line.
pub const MAX_LINE_QUANTITY: i64 = 100_000;

/// Maximum lines in a single sale, order or PO.
pub const MAX_LINES_PER_DOCUMENT: usize = 200;

/// Maximum unit price or cost, in cents.
pub const MAX_PRICE_CENTS: i64 = 100_000_000_000;

/// Safety stock for new inventory rows when none is given.
pub const DEFAULT_SAFETY_STOCK: i64 = 5;
