//! # mercato-stock: Concurrent Stock Ledger
//!
//! Keeps per-shop, per-product stock lots consistent while many registers
//! sell at once.
//!
//! ## Module Organization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         mercato-stock                                   │
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐    │
//! │  │ coordinator │  │   ledger    │  │   memory    │  │   audit     │    │
//! │  │             │  │             │  │             │  │             │    │
//! │  │ Sale draft  │  │ FIFO + OCC  │  │ In-process  │  │ In-process  │    │
//! │  │ → finalize  │  │ retry loop  │  │ lot store   │  │ audit sink  │    │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘    │
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                     │
//! │  │   config    │  │  telemetry  │  │   error     │                     │
//! │  │             │  │             │  │             │                     │
//! │  │ TOML + env  │  │ tracing     │  │ ConfigError │                     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use mercato_stock::{LedgerConfig, StockLedger, SaleCoordinator};
//! use mercato_db::Database;
//!
//! let config = LedgerConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let ledger = StockLedger::new(db.lots(), Arc::new(db.audit()))
//!     .with_policy(config.retry_policy());
//!
//! let changes = ledger.decrease_for_product("milk-1l", "shop-1", 12).await?;
//! ```

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod telemetry;

pub use audit::MemoryAuditSink;
pub use config::{DatabaseSettings, LedgerConfig, RetrySettings};
pub use coordinator::SaleCoordinator;
pub use error::{ConfigError, ConfigResult};
pub use ledger::{StockLedger, StockTransaction};
pub use memory::{InMemoryLotStore, MemoryUnit};
pub use telemetry::init_tracing;
