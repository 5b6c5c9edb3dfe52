//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  DukaConfig::load(path) ──► db_config()                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::connect(&config).await ← Create pool + run migrations       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.sales() / db.payments() / ...  ← cheap handles over the pool       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Locking
//! Readers never block in WAL mode, but there is exactly one writer at a
//! time. Every mutating transaction in this crate starts with a write to
//! the rows it is about to read, so it holds the write lock before its
//! first read. A transaction that waits longer than `busy_timeout` for
//! that lock fails with [`DbError::ConcurrencyConflict`].

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DukaConfig;
use crate::error::{DbError, DbResult};
use crate::gateway::{PaymentGateway, SimulatedGateway};
use crate::migrations;
use crate::notify::{Notifier, TracingNotifier};
use crate::repository::catalog::CatalogRepository;
use crate::repository::fulfillment::FulfillmentService;
use crate::repository::inventory::InventoryRepository;
use crate::repository::license::LicenseRepository;
use crate::repository::order::OrderRepository;
use crate::repository::otp::OtpRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::purchasing::PurchaseOrderRepository;
use crate::repository::rbac::RbacRepository;
use crate::repository::reception::ReceptionRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::shipment::ShipmentRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/duka/duka.db")
///     .max_connections(5)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Pool acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Wait for the write lock before giving up.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cloning is cheap: the pool, settings and collaborators are shared.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::connect(&DukaConfig::load(None)?).await?;
/// let sale = db.sales().execute_sale(new_sale).await?;
/// let outcome = db.payments().handle_webhook(payload).await;
/// ```
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    settings: Arc<DukaConfig>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn PaymentGateway>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.pool)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Creates a new database connection pool with default settings,
    /// the logging notifier and the simulated gateway.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite: WAL, NORMAL synchronous, foreign keys,
    ///    busy timeout
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let settings = DukaConfig::default();
        Self::open(config, settings).await
    }

    /// Connects using a loaded [`DukaConfig`].
    pub async fn connect(settings: &DukaConfig) -> DbResult<Self> {
        Self::open(settings.db_config(), settings.clone()).await
    }

    async fn open(config: DbConfig, settings: DukaConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!(busy_timeout = ?config.busy_timeout, "Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let gateway = SimulatedGateway::new(settings.payments.control_number_validity_days);
        let db = Database {
            pool,
            settings: Arc::new(settings),
            notifier: Arc::new(TracingNotifier),
            gateway: Arc::new(gateway),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Replaces the SMS collaborator.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the payment gateway collaborator.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replaces the business settings. Pool settings are unaffected.
    pub fn with_settings(mut self, settings: DukaConfig) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Runs database migrations. Called by the constructors unless
    /// disabled in [`DbConfig`].
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &DukaConfig {
        &self.settings
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(
            self.pool.clone(),
            self.settings.inventory.default_safety_stock,
        )
    }

    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone())
    }

    pub fn receptions(&self) -> ReceptionRepository {
        ReceptionRepository::new(self.pool.clone())
    }

    pub fn purchasing(&self) -> PurchaseOrderRepository {
        PurchaseOrderRepository::new(self.pool.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn licenses(&self) -> LicenseRepository {
        LicenseRepository::new(self.pool.clone())
    }

    pub fn shipments(&self) -> ShipmentRepository {
        ShipmentRepository::new(
            self.pool.clone(),
            self.settings.shipping.default_method.clone(),
        )
    }

    pub fn fulfillment(&self) -> FulfillmentService {
        FulfillmentService::new(self.pool.clone(), self.shipments(), self.notifier.clone())
    }

    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(
            self.pool.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            self.fulfillment(),
            self.settings.payments.payment_method.clone(),
        )
    }

    pub fn rbac(&self) -> RbacRepository {
        RbacRepository::new(self.pool.clone())
    }

    pub fn otp(&self) -> OtpRepository {
        OtpRepository::new(
            self.pool.clone(),
            self.notifier.clone(),
            self.settings.otp.clone(),
        )
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }
}
