//! Money handling in integer cents
//!
//! All monetary quantities in this crate are integer cents. Floating point
//! appears only transiently inside rate formulas (RVU products, wage
//! adjustments, unit scaling) and is converted back to cents with banker's
//! rounding (round half to even) at the conversion point.

use serde::{Deserialize, Serialize};

/// Monetary amount in US cents.
pub type Cents = i64;

/// Convert a dollar amount to cents with banker's rounding.
pub fn dollars_to_cents(dollars: f64) -> Cents {
    (dollars * 100.0).round_ties_even() as Cents
}

/// Round a fractional cent amount to whole cents with banker's rounding.
pub fn round_cents(value: f64) -> Cents {
    value.round_ties_even() as Cents
}

/// Scale a cent amount by a floating factor, rounding half to even.
pub fn scale_cents(cents: Cents, factor: f64) -> Cents {
    round_cents(cents as f64 * factor)
}

/// Output representation for monetary fields.
///
/// Responses default to raw cents; `decimal` renders dollars with two
/// fractional digits for human-facing consumers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MoneyFormat {
    /// Integer cents (canonical)
    #[default]
    Cents,

    /// Decimal dollars, two fractional digits
    Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bankers_rounding_half_to_even() {
        // Ties round toward the even cent
        assert_eq!(round_cents(2.5), 2);
        assert_eq!(round_cents(3.5), 4);
        assert_eq!(round_cents(-2.5), -2);
        assert_eq!(round_cents(1771.8), 1772);
    }

    #[test]
    fn test_dollars_to_cents() {
        assert_eq!(dollars_to_cents(88.591872), 8859);
        assert_eq!(dollars_to_cents(0.0), 0);
        assert_eq!(dollars_to_cents(1.005), 100); // 100.5 rounds to even
    }

    #[test]
    fn test_scale_cents() {
        assert_eq!(scale_cents(8859, 0.20), 1772);
        assert_eq!(scale_cents(100, 1.5), 150);
        assert_eq!(scale_cents(101, 0.5), 50); // 50.5 rounds to even
    }
}
