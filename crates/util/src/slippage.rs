//! Slippage math on integer token amounts.
//!
//! Percentages are converted to a fixed-point factor with six decimals before
//! touching the amount, so `slip(1_000_000, 0.1)` is exactly `999_000`.

use alloy_primitives::U256;
use thiserror::Error;

/// Fixed-point scale used for slippage factors.
pub const SLIPPAGE_PRECISION: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SlippageError {
    #[error("slippage must be non-negative, got {0}")]
    Negative(f64),
    #[error("slippage must be a finite number, got {0}")]
    NotFinite(f64),
    #[error("{amount} adjusted by {slippage}% does not fit in 256 bits")]
    Overflow { amount: U256, slippage: f64 },
}

/// Slippage expressed in millionths of the amount.
fn basis(slippage: f64) -> Result<u64, SlippageError> {
    if !slippage.is_finite() {
        return Err(SlippageError::NotFinite(slippage));
    }
    if slippage < 0.0 {
        return Err(SlippageError::Negative(slippage));
    }
    Ok((slippage * (SLIPPAGE_PRECISION / 100) as f64).round() as u64)
}

/// Splits `amount * factor / SLIPPAGE_PRECISION` into a whole part and the
/// numerator of the remainder, so large amounts never overflow the product.
fn scale(amount: U256, factor: u64) -> Option<(U256, U256)> {
    let precision = U256::from(SLIPPAGE_PRECISION);
    let factor = U256::from(factor);
    let whole = (amount / precision).checked_mul(factor)?;
    Some((whole, (amount % precision) * factor))
}

/// Minimum acceptable amount after `slippage` percent, rounded down.
pub fn slip(amount: U256, slippage: f64) -> Result<U256, SlippageError> {
    let factor = SLIPPAGE_PRECISION.saturating_sub(basis(slippage)?);
    // factor <= precision, so the whole part never exceeds `amount`
    let (whole, remainder) = scale(amount, factor).ok_or(SlippageError::Overflow { amount, slippage })?;
    Ok(whole + remainder / U256::from(SLIPPAGE_PRECISION))
}

/// Maximum acceptable amount after `slippage` percent, rounded up. Used when a
/// run is reversed and the quoted figure is an input rather than an output.
pub fn pad(amount: U256, slippage: f64) -> Result<U256, SlippageError> {
    let factor = SLIPPAGE_PRECISION.saturating_add(basis(slippage)?);
    let overflow = SlippageError::Overflow { amount, slippage };
    let (whole, remainder) = scale(amount, factor).ok_or(overflow)?;
    whole
        .checked_add(remainder.div_ceil(U256::from(SLIPPAGE_PRECISION)))
        .ok_or(overflow)
}

/// Orders a pair by direction: `(a, b)` when forward, `(b, a)` otherwise.
pub fn direction<T>(a: T, b: T, forward: bool) -> (T, T) {
    if forward { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slip_rounds_down_with_six_decimals() {
        assert_eq!(slip(U256::from(1_000_000u64), 0.1).expect("slip"), U256::from(999_000u64));
        assert_eq!(slip(U256::from(1_000u64), 0.0).expect("slip"), U256::from(1_000u64));
        assert_eq!(slip(U256::from(999u64), 50.0).expect("slip"), U256::from(499u64));
    }

    #[test]
    fn slip_rejects_negative_and_nan() {
        assert_eq!(slip(U256::from(1u64), -0.5), Err(SlippageError::Negative(-0.5)));
        assert!(matches!(slip(U256::from(1u64), f64::NAN), Err(SlippageError::NotFinite(_))));
    }

    #[test]
    fn full_slippage_floors_at_zero() {
        assert_eq!(slip(U256::from(1_000u64), 150.0).expect("slip"), U256::ZERO);
    }

    #[test]
    fn pad_rounds_up() {
        assert_eq!(pad(U256::from(1_000_000u64), 0.1).expect("pad"), U256::from(1_001_000u64));
        assert_eq!(pad(U256::from(3u64), 10.0).expect("pad"), U256::from(4u64));
    }

    #[test]
    fn large_amounts_do_not_overflow() {
        let amount = U256::from(10u64).pow(U256::from(75u64));
        let unit = U256::from(10u64).pow(U256::from(72u64));
        assert_eq!(slip(amount, 0.1).expect("slip"), U256::from(999u64) * unit);
        assert_eq!(pad(amount, 0.1).expect("pad"), U256::from(1_001u64) * unit);

        assert_eq!(slip(U256::MAX, 0.0).expect("slip"), U256::MAX);
        assert_eq!(slip(U256::MAX, 100.0).expect("slip"), U256::ZERO);
        let slipped = slip(U256::MAX, 0.1).expect("slip");
        assert!(slipped < U256::MAX && slipped > U256::MAX / U256::from(2u64));
    }

    #[test]
    fn pad_reports_results_wider_than_256_bits() {
        assert!(matches!(pad(U256::MAX, 0.1), Err(SlippageError::Overflow { .. })));
        assert_eq!(pad(U256::MAX, 0.0).expect("pad"), U256::MAX);
    }

    #[test]
    fn direction_swaps_when_reversed() {
        assert_eq!(direction("bean", "usdc", true), ("bean", "usdc"));
        assert_eq!(direction("bean", "usdc", false), ("usdc", "bean"));
    }
}
