//! # Seed Data Generator
//!
//! Populates a database with a small demo back office for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./duka_dev.db
//! cargo run -p duka-db --bin seed
//!
//! # Specify database path and config file
//! cargo run -p duka-db --bin seed -- --db ./data/duka.db --config duka.toml
//!
//! # More logging
//! RUST_LOG=duka_db=debug cargo run -p duka-db --bin seed
//! ```
//!
//! ## Generated Data
//! - Product specifications across phones, accessories and audio, each
//!   with an opening ADJUST movement
//! - Digital products with a pool of license keys
//! - Capabilities and three roles: stock_clerk, cashier, manager

use std::env;
use std::path::PathBuf;

use duka_core::access::capabilities;
use duka_core::NewSpecification;
use duka_db::{Database, DukaConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// (name, brand, category, color, original price, sale price, opening stock)
const PRODUCTS: &[(&str, &str, &str, Option<&str>, i64, i64, i64)] = &[
    ("Galaxy A15", "Samsung", "Phones", Some("Black"), 45_000_000, 42_000_000, 25),
    ("Galaxy A15", "Samsung", "Phones", Some("Blue"), 45_000_000, 42_000_000, 12),
    ("Redmi 13C", "Xiaomi", "Phones", Some("Green"), 32_000_000, 30_000_000, 18),
    ("Spark 20", "Tecno", "Phones", Some("Gold"), 28_000_000, 28_000_000, 30),
    ("Silicone Case A15", "Samsung", "Accessories", Some("Red"), 1_500_000, 1_200_000, 80),
    ("USB-C Charger 25W", "Anker", "Accessories", None, 3_500_000, 3_000_000, 40),
    ("Power Bank 10000mAh", "Oraimo", "Accessories", Some("Black"), 4_500_000, 4_000_000, 0),
    ("FreeBuds SE", "Huawei", "Audio", Some("White"), 9_000_000, 8_500_000, 15),
];

/// (product name, key prefix, keys)
const DIGITAL: &[(&str, &str, usize)] = &[
    ("Antivirus Pro 1 Year", "AVP", 20),
    ("Office Suite Home", "OFH", 10),
];

/// (role, description, capabilities)
const ROLES: &[(&str, &str, &[&str])] = &[
    (
        "stock_clerk",
        "Receives goods and counts stock",
        &[capabilities::STOCK_RECEIVE, capabilities::INVENTORY_VIEW, capabilities::INVENTORY_ADJUST],
    ),
    (
        "cashier",
        "Runs the counter",
        &[capabilities::SALE_EXECUTE, capabilities::INVENTORY_VIEW, capabilities::PAYMENT_REQUEST],
    ),
    ("manager", "Everything", capabilities::ALL),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Duka Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./duka_dev.db)");
                println!("  -c, --config <PATH>   duka.toml to load settings from");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = DukaConfig::load(config_path.as_deref())?;
    config.database.path = db_path.unwrap_or_else(|| PathBuf::from("./duka_dev.db"));

    println!("🌱 Duka Seed Data Generator");
    println!("===========================");
    println!("Database: {}", config.database.path.display());
    println!();

    let db = Database::connect(&config).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_specifications")
        .fetch_one(db.pool())
        .await?;
    if existing > 0 {
        println!("⚠ Database already has {} specifications", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();

    println!();
    println!("Creating catalog...");
    for (name, brand, category, color, original, sale, opening) in PRODUCTS {
        let spec = db
            .catalog()
            .create_specification(NewSpecification {
                product_name: name.to_string(),
                brand: brand.to_string(),
                category: category.to_string(),
                color: color.map(str::to_string),
                original_price_cents: *original,
                sale_price_cents: *sale,
                safety_stock_level: None,
                location: Some("Main store".to_string()),
            })
            .await?;

        if *opening > 0 {
            db.inventory()
                .adjust_stock(&spec.sku, *opening, "Opening balance", "seed")
                .await?;
        }
        println!("  {:<16} {} {} ({} in stock)", spec.sku, brand, name, opening);
    }

    println!();
    println!("Loading license keys...");
    for (name, prefix, count) in DIGITAL {
        let product = db.catalog().create_digital_product(name).await?;
        let keys: Vec<String> = (1..=*count)
            .map(|n| format!("{}-{:04}-{}", prefix, n, &uuid::Uuid::new_v4().simple().to_string()[..8]))
            .collect();
        let loaded = db.licenses().load_keys(&product.id, &keys).await?;
        println!("  {} ({} keys)", name, loaded);
    }

    println!();
    println!("Creating roles...");
    let rbac = db.rbac();
    for slug in capabilities::ALL {
        rbac.create_permission(slug, slug).await?;
    }
    for (role, description, granted) in ROLES {
        rbac.create_role(role, Some(*description)).await?;
        for slug in *granted {
            rbac.grant_permission(role, slug).await?;
        }
        println!("  {} ({} capabilities)", role, granted.len());
    }

    let low = db.inventory().low_stock().await?;

    println!();
    println!("✓ Seeded in {:?}", start.elapsed());
    println!("  {} SKUs at or below safety stock", low.len());

    info!(products = PRODUCTS.len(), digital = DIGITAL.len(), roles = ROLES.len(), "Seed complete");
    db.close().await;
    Ok(())
}
