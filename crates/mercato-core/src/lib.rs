//! # mercato-core: Pure Domain Logic for the Mercato Stock Ledger
//!
//! This crate is the **heart** of the stock ledger. It holds the lot, sale
//! and audit types, the FIFO-by-expiration allocation rule, the retry
//! schedule and the interfaces the ledger consumes, all with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mercato Stock Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               mercato-stock (Ledger + Coordinator)              │   │
//! │  │    decrease_for_sale, increase, reserve, finalize, ...          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ mercato-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   fifo    │  │   retry   │  │   store   │  │   │
//! │  │   │ StockLot  │  │ plan_     │  │ Retry     │  │ LotStore  │  │   │
//! │  │   │   Sale    │  │ decrement │  │ Policy    │  │ UnitOfWork│  │   │
//! │  │   │AuditRecord│  │ sort_fifo │  │           │  │ AuditSink │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO TIMERS • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 mercato-db (Database Layer)                     │   │
//! │  │        SQLite lot store, audit table, sale repository           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockLot, Sale, AuditRecord, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - `StockError` and `ValidationError`
//! - [`validation`] - Input rule checks
//! - [`fifo`] - Oldest-expiration-first allocation planning
//! - [`retry`] - Retry bounds for conflicting writes
//! - [`store`] - Interfaces for lot storage and the audit sink
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use mercato_core::fifo::plan_decrement;
//! use mercato_core::types::{NewLot, StockLot};
//!
//! let day = |d| NaiveDate::from_ymd_opt(2026, 1, d).unwrap();
//! let lots = vec![
//!     StockLot::from_new(NewLot::new("milk", "shop-1", 10, day(1)).expiring(day(1))),
//!     StockLot::from_new(NewLot::new("milk", "shop-1", 10, day(1)).expiring(day(5))),
//! ];
//!
//! // 12 units: the lot expiring on day 1 is emptied first
//! let plan = plan_decrement("milk", "shop-1", &lots, 12).unwrap();
//! assert_eq!(plan[0].take, 10);
//! assert_eq!(plan[1].take, 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fifo;
pub mod money;
pub mod retry;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{StockError, StockResult, ValidationError};
pub use money::Money;
pub use retry::RetryPolicy;
pub use store::{AuditSink, LotStore, UnitOfWork, WriteOutcome};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines allowed on a single sale.
pub const MAX_SALE_LINES: usize = 100;

/// Maximum quantity of a single product on one sale line.
///
/// ## Business Reason
/// Prevents accidental over-ordering at the register (typing 1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;
