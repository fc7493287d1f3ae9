//! Fee calculator
//!
//! `fee = floor(amount * rate / 100)`, `seller = amount - fee`. The product
//! is computed at the native width with a checked multiply, so an amount whose
//! product with the rate does not fit is rejected instead of wrapping.

use crate::{error::EscrowError, EscrowResult};
use serde::{Deserialize, Serialize};

/// Canonical protocol fee, in whole percent
pub const DEFAULT_FEE_RATE_PERCENT: u64 = 2;

/// Result of splitting an escrow amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub seller_amount: u64,
    pub fee_amount: u64,
}

/// Pure fee calculator bound to one rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    fee_rate_percent: u64,
}

impl FeeCalculator {
    pub fn new(fee_rate_percent: u64) -> EscrowResult<Self> {
        if fee_rate_percent > 100 {
            return Err(EscrowError::config(format!(
                "Fee rate {}% exceeds 100%",
                fee_rate_percent
            )));
        }
        Ok(Self { fee_rate_percent })
    }

    pub fn fee_rate_percent(&self) -> u64 {
        self.fee_rate_percent
    }

    pub fn split(&self, amount: u64) -> EscrowResult<FeeSplit> {
        split(amount, self.fee_rate_percent)
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self {
            fee_rate_percent: DEFAULT_FEE_RATE_PERCENT,
        }
    }
}

/// Split `amount` into seller and fee portions
pub fn split(amount: u64, fee_rate_percent: u64) -> EscrowResult<FeeSplit> {
    let product = amount.checked_mul(fee_rate_percent).ok_or_else(|| {
        EscrowError::overflow(format!(
            "amount {} * fee rate {} exceeds u64",
            amount, fee_rate_percent
        ))
    })?;
    let fee_amount = product / 100;
    let seller_amount = amount
        .checked_sub(fee_amount)
        .ok_or_else(|| EscrowError::overflow("fee exceeds amount"))?;

    Ok(FeeSplit {
        seller_amount,
        fee_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_amount() {
        let s = split(1_000_000, 2).unwrap();
        assert_eq!(s.fee_amount, 20_000);
        assert_eq!(s.seller_amount, 980_000);
    }

    #[test]
    fn test_floor_division() {
        let s = split(999, 2).unwrap();
        assert_eq!(s.fee_amount, 19);
        assert_eq!(s.seller_amount, 980);
    }

    #[test]
    fn test_overflow_boundary() {
        // largest amount whose product with 2 still fits
        let max_ok = u64::MAX / 2;
        let s = split(max_ok, 2).unwrap();
        assert_eq!(s.fee_amount + s.seller_amount, max_ok);

        match split(max_ok + 1, 2) {
            Err(EscrowError::MathOverflow(_)) => {}
            other => panic!("Expected MathOverflow, got {:?}", other),
        }
        assert!(matches!(split(u64::MAX, 2), Err(EscrowError::MathOverflow(_))));
    }

    #[test]
    fn test_rate_bounds() {
        assert!(FeeCalculator::new(100).is_ok());
        assert!(FeeCalculator::new(101).is_err());
        assert_eq!(split(500, 0).unwrap().fee_amount, 0);
        assert_eq!(split(500, 100).unwrap().seller_amount, 0);
    }

    proptest! {
        #[test]
        fn split_preserves_amount(amount in 0u64..=u64::MAX / 100, rate in 0u64..=100) {
            let s = split(amount, rate).unwrap();
            prop_assert_eq!(s.fee_amount + s.seller_amount, amount);
            prop_assert_eq!(s.fee_amount, amount * rate / 100);
        }
    }
}
