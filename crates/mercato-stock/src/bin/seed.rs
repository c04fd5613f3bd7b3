//! # Stock Seed Generator
//!
//! Receives demo stock lots into a ledger database for development.
//!
//! ## Usage
//! ```bash
//! # Seed 3 shops (default)
//! cargo run -p mercato-stock --bin seed
//!
//! # More shops, custom database
//! cargo run -p mercato-stock --bin seed -- --shops 10 --db ./data/stock.db
//! ```
//!
//! ## Generated Lots
//! Every shop gets every product in 1 to 4 lots with staggered purchase
//! and expiration dates, so FIFO order is visible. Non-perishables get no
//! expiration date.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::info;

use mercato_core::NewLot;
use mercato_db::Database;
use mercato_stock::{init_tracing, LedgerConfig, StockLedger};

/// (product id, unit cost in cents, shelf life in days; 0 = does not expire)
const PRODUCTS: &[(&str, i64, i64)] = &[
    ("milk-1l", 89, 10),
    ("yogurt-500g", 119, 21),
    ("bread-wheat", 149, 4),
    ("eggs-12", 259, 28),
    ("butter-250g", 199, 60),
    ("cheddar-200g", 329, 90),
    ("apples-1kg", 249, 30),
    ("pasta-penne", 99, 0),
    ("rice-white-1kg", 179, 0),
    ("cola-2l", 159, 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut shops: usize = 3;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--shops" | "-s" => {
                if i + 1 < args.len() {
                    shops = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Mercato Stock Seed Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --shops <N>    Number of shops to stock (default: 3)");
                println!("  -d, --db <PATH>    Database file path (default: from ledger.toml)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = LedgerConfig::load_or_default(None);
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Mercato Stock Seed Generator");
    println!("============================");
    println!("Database: {}", config.database.path.display());
    println!("Shops:    {}", shops);
    println!();

    let db = Database::new(config.db_config()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.lots().total_quantity(PRODUCTS[0].0, &shop_id(0)).await?;
    if existing > 0 {
        println!("⚠ shop-001 already holds {} units of {}", existing, PRODUCTS[0].0);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let ledger = StockLedger::new(db.lots(), Arc::new(db.audit())).with_policy(config.retry_policy());
    let today = Utc::now().date_naive();

    println!();
    println!("Receiving lots...");

    let start = std::time::Instant::now();
    let mut received = 0;

    for shop_idx in 0..shops {
        let shop = shop_id(shop_idx);
        for (product_idx, (product, cost, shelf_days)) in PRODUCTS.iter().enumerate() {
            let seed = shop_idx * PRODUCTS.len() + product_idx;
            for lot_idx in 0..lot_count(seed) {
                let new = demo_lot(&shop, product, *cost, *shelf_days, today, seed, lot_idx);
                if let Err(e) = ledger.receive_lot(new).await {
                    eprintln!("Failed to receive {} for {}: {}", product, shop, e);
                    continue;
                }
                received += 1;
            }
        }
        println!("  Stocked {}", shop);
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Received {} lots in {:?}", received, elapsed);

    println!();
    println!("Totals for {}:", shop_id(0));
    for (product, _, _) in PRODUCTS {
        let total = ledger.get_total_quantity(product, &shop_id(0)).await?;
        println!("  {:<16} {:>5}", product, total);
    }

    info!(lots = received, shops, "Seed complete");
    db.close().await;

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

fn shop_id(index: usize) -> String {
    format!("shop-{:03}", index + 1)
}

fn lot_count(seed: usize) -> usize {
    1 + seed % 4
}

/// Builds lot `lot_idx` of a product: older lots were bought earlier and
/// expire earlier.
fn demo_lot(
    shop: &str,
    product: &str,
    cost_cents: i64,
    shelf_days: i64,
    today: NaiveDate,
    seed: usize,
    lot_idx: usize,
) -> NewLot {
    let age_days = (lot_count(seed) - lot_idx) as i64 * 3;
    let purchased = today - Duration::days(age_days);
    let quantity = 5 + ((seed * 7 + lot_idx * 13) % 40) as i64;

    let lot = NewLot::new(product, shop, quantity, purchased)
        .priced_at(cost_cents)
        .supplied_by(format!("supplier-{}", seed % 5 + 1));

    if shelf_days > 0 {
        lot.expiring(purchased + Duration::days(shelf_days))
    } else {
        lot
    }
}
