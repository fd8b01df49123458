//! U256 token-amount conversions for report figures.
//!
//! Loss and discount figures in reports are plain floats; this module keeps
//! the U256 → f64 scaling in one place instead of stringifying amounts.

use alloy::primitives::U256;

/// Pre-computed powers of 10 for fast decimal conversion
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Fast power of 10 lookup (up to 10^38)
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Convert a raw token amount to a float using the token's decimals.
///
/// Splits into integer and fractional parts before the float conversion so
/// amounts far above 2^64 units still convert without saturating.
pub fn to_f64_lossy(amount: U256, decimals: u8) -> f64 {
    let scale = pow10(decimals);
    let integer = amount / scale;
    let fraction = amount % scale;

    let integer = u128::try_from(integer).map_or(f64::MAX, |v| v as f64);
    let fraction = u128::try_from(fraction).map_or(0.0, |v| v as f64);

    integer + fraction / (POW10[decimals.min(38) as usize] as f64)
}

/// Convert an 18-decimal (WAD) amount to a float. Debt and stablecoin
/// amounts are always WAD-scaled on these controllers.
pub fn wad_to_f64(amount: U256) -> f64 {
    to_f64_lossy(amount, 18)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(18), U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(pow10(40), U256::from(10u64).pow(U256::from(40u64)));
    }

    #[test]
    fn test_wad_conversion() {
        let one_and_half = U256::from(1_500_000_000_000_000_000u64);
        assert!((wad_to_f64(one_and_half) - 1.5).abs() < 1e-12);
        assert_eq!(wad_to_f64(U256::ZERO), 0.0);
    }

    #[test]
    fn test_small_decimals() {
        // 123.45 with 6 decimals (USDC-style)
        let amount = U256::from(123_450_000u64);
        assert!((to_f64_lossy(amount, 6) - 123.45).abs() < 1e-9);
    }

    #[test]
    fn test_huge_amount_does_not_saturate() {
        // 10^48 raw at 18 decimals = 10^30 tokens
        let amount = pow10(48);
        let converted = to_f64_lossy(amount, 18);
        assert!((converted - 1e30).abs() / 1e30 < 1e-9);
    }
}
