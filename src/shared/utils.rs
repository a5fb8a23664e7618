//! Utility functions and helpers

use rust_decimal::Decimal;

/// Relative change from `old_value` to `new_value`, in percent
pub fn calculate_percentage_change(old_value: Decimal, new_value: Decimal) -> Decimal {
    if old_value > Decimal::ZERO {
        (new_value - old_value) / old_value * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

/// Generate unique ID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
