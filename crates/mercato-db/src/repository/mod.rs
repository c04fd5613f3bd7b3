//! # Repository Module
//!
//! SQLite implementations of the ledger's storage seams, plus sale rows.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  StockLedger                                                           │
//! │       │  store.begin()                                                 │
//! │       ▼                                                                 │
//! │  SqliteLotStore ──► SqliteUnit (BEGIN ... COMMIT)                      │
//! │                      ├── SELECT lots ORDER BY expiration               │
//! │                      ├── UPDATE ... WHERE id = ? AND version = ?       │
//! │                      └── SAVEPOINT / ROLLBACK TO / RELEASE             │
//! │                                                                         │
//! │  SqliteAuditSink ──► INSERT INTO stock_audit                           │
//! │  SaleRepository  ──► sales / sale_lines / payments                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`lot::SqliteLotStore`] - Lot reads and version-checked writes
//! - [`audit::SqliteAuditSink`] - Append-only lot history
//! - [`sale::SaleRepository`] - Sale, line and payment rows

pub mod audit;
pub mod lot;
pub mod sale;
