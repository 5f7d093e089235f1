//! Fixed-point collateralization math.
//!
//! Mirrors the platform's own on-chain arithmetic exactly: integer U256
//! throughout, multiply before divide, 1e18 scale. Any drift between this
//! prediction and the platform's check at `liquidate` time turns into a
//! wasted reverted transaction, so floats are never involved.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Liquidation threshold numerator: 105% of principal.
/// Interest is deliberately excluded, matching the platform.
const THRESHOLD_NUM: u64 = 105;
const THRESHOLD_DEN: u64 = 100;

/// Market value of posted collateral at `price` (1e18-scaled).
///
/// `(collateral * price) / 1e18`; the multiply happens first to preserve
/// fixed-point precision.
#[inline]
pub fn collateral_value(collateral: U256, price: U256) -> U256 {
    (collateral * price) / WAD
}

/// Liquidation threshold for a loan: 105% of principal.
#[inline]
pub fn liquidation_threshold(principal: U256) -> U256 {
    (principal * U256::from(THRESHOLD_NUM)) / U256::from(THRESHOLD_DEN)
}

/// Whether the loan is under-collateralized at `price`.
///
/// Strictly less-than: collateral value exactly at the threshold is still
/// healthy, same as the platform's check.
#[inline]
pub fn is_undercollateralized(collateral: U256, principal: U256, price: U256) -> bool {
    collateral_value(collateral, price) < liquidation_threshold(principal)
}
