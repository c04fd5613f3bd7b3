//! # mercato-db: Database Layer for the Mercato Stock Ledger
//!
//! SQLite storage behind the interfaces declared in `mercato-core`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mercato Stock Data Flow                           │
//! │                                                                         │
//! │  StockLedger / SaleCoordinator (mercato-stock)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   mercato-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SqliteLotStore│    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SqliteAudit.. │    │ 001_stock_   │  │   │
//! │  │   │               │    │ SaleRepository│    │   ledger.sql │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL mode)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mercato_db::{Database, DbConfig};
//! use mercato_core::LotStore;
//!
//! let db = Database::new(DbConfig::new("path/to/stock.db")).await?;
//!
//! let mut unit = db.lots().begin().await?;
//! let lots = unit.lots_for_product("milk", "shop-1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::audit::SqliteAuditSink;
pub use repository::lot::{SqliteLotStore, SqliteUnit};
pub use repository::sale::SaleRepository;
