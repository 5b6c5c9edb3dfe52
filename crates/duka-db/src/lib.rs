//! # duka-db: Database Layer for Duka
//!
//! Every stateful back-office operation, on SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Duka Data Flow                                   │
//! │                                                                         │
//! │  Request handler / webhook endpoint / seed binary                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     duka-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ Inventory      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Purchasing     │    │ 001 catalog  │  │   │
//! │  │   │ DukaConfig    │    │ Sales          │    │ 002 purchase │  │   │
//! │  │   │ Collaborators │    │ Payments ...   │    │ 003 orders   │  │   │
//! │  │   └───────────────┘    └────────────────┘    │ 004 access   │  │   │
//! │  │                                              └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL), one writer at a time                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - `duka.toml` + `DUKA_*` environment settings
//! - [`pool`] - Connection pool and repository accessors
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`gateway`] / [`notify`] - Payment gateway and SMS collaborators
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use duka_db::{Database, DukaConfig};
//!
//! let config = DukaConfig::load(Some(Path::new("duka.toml")))?;
//! let db = Database::connect(&config).await?;
//!
//! let po = db.purchasing().create_order(new_po).await?;
//! db.receptions().record_reception(&po_item_id, 60, 10, "clerk-1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gateway;
pub mod migrations;
pub mod notify;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, DukaConfig};
pub use error::{DbError, DbResult};
pub use gateway::{GatewayError, PaymentGateway, SimulatedGateway};
pub use notify::{Notifier, TracingNotifier};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::fulfillment::FulfillmentService;
pub use repository::payment::PaymentRepository;
pub use repository::rbac::{CapabilityCheck, RbacRepository};
pub use repository::sale::SaleRepository;
