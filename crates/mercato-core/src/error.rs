//! # Error Types
//!
//! Domain-specific error types for mercato-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mercato-core errors (this file)                                       │
//! │  ├── StockError       - Ledger and sale lifecycle outcomes             │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  mercato-db errors (separate crate)                                    │
//! │  └── DbError          - Database failures, converted to StockError     │
//! │                                                                         │
//! │  Flow: ValidationError → StockError ← DbError                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Taxonomy
//! ```text
//! InsufficientStock / LotNotFound  → final, never retried
//! Conflict                         → transient, retried by the ledger
//! Storage                          → fatal, propagated immediately
//! ```

use thiserror::Error;

// =============================================================================
// Stock Error
// =============================================================================

/// Outcomes of ledger and sale operations that are not success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    /// Not enough units across all lots of (product, shop).
    ///
    /// ## User Workflow
    /// ```text
    /// Finalize sale (milk × 6)
    ///      │
    ///      ▼
    /// Lots hold 5 units in total
    ///      │
    ///      ▼
    /// InsufficientStock { requested: 6, available: 5 }
    ///      │
    ///      ▼
    /// Register shows: "cannot complete sale"
    /// ```
    #[error(
        "Insufficient stock for product {product_id} at shop {shop_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: String,
        shop_id: String,
        requested: i64,
        available: i64,
    },

    /// No lot exists at all for (product, shop). Same outcome as
    /// `InsufficientStock` with nothing available.
    #[error("No stock lots for product {product_id} at shop {shop_id}")]
    LotNotFound { product_id: String, shop_id: String },

    /// A lot addressed by id does not exist.
    #[error("Stock lot not found: {0}")]
    UnknownLot(String),

    /// A concurrent writer changed a lot between read and write.
    ///
    /// Within the ledger this is retried; it only reaches callers once the
    /// retry budget is spent.
    #[error("Concurrent modification of lot {lot_id} (after {attempts} attempt(s))")]
    Conflict { lot_id: String, attempts: u32 },

    /// Sale cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Sale already has a payment and can no longer change.
    #[error("Sale {0} is finalized")]
    SaleFinalized(String),

    /// Sale lines were edited after the register loaded them for payment.
    /// Nothing was committed; reload the sale and finalize again.
    #[error("Sale {0} changed during finalization")]
    SaleChanged(String),

    /// Sale has no line items and cannot be finalized.
    #[error("Sale {0} has no line items")]
    EmptySale(String),

    /// Product is not on the sale.
    #[error("Product {product_id} is not on sale {sale_id}")]
    LineNotFound { sale_id: String, product_id: String },

    /// Payment does not fit the sale.
    #[error("Invalid payment: {reason}")]
    InvalidPayment { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage layer failure (connectivity, constraint, ...). Never retried.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl StockError {
    /// Creates a Conflict error for a given lot.
    pub fn conflict(lot_id: impl Into<String>, attempts: u32) -> Self {
        StockError::Conflict {
            lot_id: lot_id.into(),
            attempts,
        }
    }

    /// Creates a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        StockError::Storage(message.into())
    }

    /// Returns true if re-running the operation on fresh state may succeed.
    ///
    /// Only `Conflict` qualifies: retrying cannot change true unavailability,
    /// and storage failures propagate immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::Conflict { .. })
    }

    /// Returns true for both flavours of "not enough stock".
    pub fn is_insufficient(&self) -> bool {
        matches!(
            self,
            StockError::InsufficientStock { .. } | StockError::LotNotFound { .. }
        )
    }

    /// Units missing to satisfy the request, for insufficiency errors.
    pub fn missing(&self) -> Option<i64> {
        match self {
            StockError::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with StockError.
pub type StockResult<T> = Result<T, StockError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StockError::InsufficientStock {
            product_id: "milk".to_string(),
            shop_id: "shop-1".to_string(),
            requested: 6,
            available: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product milk at shop shop-1: requested 6, available 5"
        );

        let err = StockError::conflict("lot-7", 3);
        assert_eq!(
            err.to_string(),
            "Concurrent modification of lot lot-7 (after 3 attempt(s))"
        );
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(StockError::conflict("lot-1", 1).is_retryable());

        assert!(!StockError::LotNotFound {
            product_id: "p".into(),
            shop_id: "s".into(),
        }
        .is_retryable());
        assert!(!StockError::storage("disk full").is_retryable());
        assert!(!StockError::EmptySale("sale-1".into()).is_retryable());
    }

    #[test]
    fn test_lot_not_found_counts_as_insufficient() {
        let err = StockError::LotNotFound {
            product_id: "p".into(),
            shop_id: "s".into(),
        };
        assert!(err.is_insufficient());
        assert_eq!(err.missing(), None);

        let err = StockError::InsufficientStock {
            product_id: "p".into(),
            shop_id: "s".into(),
            requested: 6,
            available: 5,
        };
        assert!(err.is_insufficient());
        assert_eq!(err.missing(), Some(1));
    }

    #[test]
    fn test_validation_converts_to_stock_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let err: StockError = validation_err.into();
        assert!(matches!(err, StockError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: quantity must be positive");
    }
}
