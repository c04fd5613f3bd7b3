//! # Validation Module
//!
//! Input checks run before any storage access.
//!
//! ## Validation Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Field               │ Rule                                             │
//! │  ────────────────────┼───────────────────────────────────────────────── │
//! │  product / shop id   │ Required, max 64 chars                           │
//! │  stock quantity      │ Positive (ledger decrease / increase / reserve)  │
//! │  requested quantity  │ Non-negative (availability check)                │
//! │  line quantity       │ 1 ..= MAX_LINE_QUANTITY                          │
//! │  sale lines          │ At most MAX_SALE_LINES distinct products         │
//! │  price               │ Non-negative cents                               │
//! │  payment amount      │ Positive cents                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::{MAX_LINE_QUANTITY, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of product, shop and supplier identifiers.
pub const MAX_ID_LENGTH: usize = 64;

/// Validates a product, shop or lot identifier.
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LENGTH,
        });
    }
    Ok(())
}

/// Validates a quantity handed to the ledger.
pub fn validate_stock_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

/// Validates a quantity asked about in an availability check.
pub fn validate_requested_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity < 0 {
        return Err(ValidationError::Negative {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

/// Validates the quantity of a single sale line.
pub fn validate_line_quantity(quantity: i64) -> ValidationResult<()> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Validates that one more line fits on a sale holding `current_lines`.
pub fn validate_line_count(current_lines: usize) -> ValidationResult<()> {
    if current_lines >= MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }
    Ok(())
}

pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: "price".to_string(),
        });
    }
    Ok(())
}

pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("product_id", "milk").is_ok());
        assert!(matches!(
            validate_id("product_id", "   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_id("product_id", &"x".repeat(65)),
            Err(ValidationError::TooLong { max: 64, .. })
        ));
    }

    #[test]
    fn test_validate_quantities() {
        assert!(validate_stock_quantity(1).is_ok());
        assert!(validate_stock_quantity(5000).is_ok());
        assert!(validate_stock_quantity(0).is_err());
        assert!(validate_stock_quantity(-3).is_err());

        assert!(validate_requested_quantity(0).is_ok());
        assert!(matches!(
            validate_requested_quantity(-1),
            Err(ValidationError::Negative { .. })
        ));

        assert!(validate_line_quantity(1).is_ok());
        assert!(validate_line_quantity(999).is_ok());
        assert!(validate_line_quantity(1000).is_err());
        assert!(validate_line_quantity(0).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_ok());
        assert!(validate_line_count(99).is_ok());
        assert!(validate_line_count(100).is_err());
    }

    #[test]
    fn test_validate_money() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(-1).is_err());
        assert!(validate_payment_amount(1).is_ok());
        assert!(validate_payment_amount(0).is_err());
    }
}
