//! Tolerance-aware floating-point comparisons.
//!
//! The `absolute_*` family compares against a fixed tolerance while the `relative_*`
//! family scales the tolerance by the magnitude of the operands.

use crate::math::{Real, TOLERANCE};

/// The default tolerance of the fuzzy comparisons.
pub const FUZZY_TOLERANCE: Real = TOLERANCE * TOLERANCE;

/// `|a - b| <= tol`
#[inline]
pub fn absolute_fuzzy_equal(a: Real, b: Real, tol: Real) -> bool {
    (a - b).abs() <= tol
}

/// `a >= b - tol`
#[inline]
pub fn absolute_fuzzy_greater_equal(a: Real, b: Real, tol: Real) -> bool {
    a >= b - tol
}

/// `a > b + tol`
#[inline]
pub fn absolute_fuzzy_greater_than(a: Real, b: Real, tol: Real) -> bool {
    a > b + tol
}

/// `a <= b + tol`
#[inline]
pub fn absolute_fuzzy_less_equal(a: Real, b: Real, tol: Real) -> bool {
    a <= b + tol
}

/// `a < b - tol`
#[inline]
pub fn absolute_fuzzy_less_than(a: Real, b: Real, tol: Real) -> bool {
    a < b - tol
}

#[inline]
fn relative_tolerance(a: Real, b: Real, tol: Real) -> Real {
    tol * (a.abs() + b.abs())
}

/// Equality with a tolerance scaled by `|a| + |b|`.
#[inline]
pub fn relative_fuzzy_equal(a: Real, b: Real, tol: Real) -> bool {
    absolute_fuzzy_equal(a, b, relative_tolerance(a, b, tol))
}

/// Strict less-than with a tolerance scaled by `|a| + |b|`.
///
/// Two values that are both (near) zero are never ordered by this comparison: the scaled
/// tolerance vanishes with them, so callers needing an absolute floor must add it themselves.
#[inline]
pub fn relative_fuzzy_less_than(a: Real, b: Real, tol: Real) -> bool {
    absolute_fuzzy_less_than(a, b, relative_tolerance(a, b, tol))
}

/// Strict greater-than with a tolerance scaled by `|a| + |b|`.
#[inline]
pub fn relative_fuzzy_greater_than(a: Real, b: Real, tol: Real) -> bool {
    absolute_fuzzy_greater_than(a, b, relative_tolerance(a, b, tol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_comparisons() {
        assert!(absolute_fuzzy_equal(1.0, 1.0 + 1.0e-13, FUZZY_TOLERANCE));
        assert!(!absolute_fuzzy_equal(1.0, 1.0 + 1.0e-10, FUZZY_TOLERANCE));
        assert!(absolute_fuzzy_greater_equal(-1.0e-3, 0.0, 2.0e-3));
        assert!(!absolute_fuzzy_greater_than(1.0e-3, 0.0, 2.0e-3));
        assert!(absolute_fuzzy_less_than(0.0, 1.0, 0.5));
    }

    #[test]
    fn relative_comparisons_scale_with_magnitude() {
        assert!(relative_fuzzy_equal(1.0e6, 1.0e6 + 1.0e-7, FUZZY_TOLERANCE));
        assert!(!relative_fuzzy_less_than(1.0e6, 1.0e6 + 1.0e-7, FUZZY_TOLERANCE));
        assert!(relative_fuzzy_less_than(1.0, 2.0, FUZZY_TOLERANCE));
        // No absolute floor: zero is not "less than" zero.
        assert!(!relative_fuzzy_less_than(0.0, 0.0, FUZZY_TOLERANCE));
    }
}
