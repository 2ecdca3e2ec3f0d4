use serde::{Deserialize, Serialize};
use xln_core::{Encoder, TokenId};

use crate::error::AccountError;

/// Per-token position inside a bilateral account, in canonical left/right form.
///
/// `offdelta` is the net off-chain debt: positive when value moved from left
/// to right. Invariant: `-left_credit_limit <= offdelta <= collateral + right_credit_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub token_id: TokenId,
    pub offdelta: i128,
    pub collateral: u128,
    /// Credit the left side extends to the right side.
    pub left_credit_limit: u128,
    /// Credit the right side extends to the left side.
    pub right_credit_limit: u128,
}

pub(crate) fn to_i128(token_id: TokenId, v: u128) -> Result<i128, AccountError> {
    i128::try_from(v).map_err(|_| AccountError::Overflow(token_id))
}

impl Delta {
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            offdelta: 0,
            collateral: 0,
            left_credit_limit: 0,
            right_credit_limit: 0,
        }
    }

    /// Bounds `(lower, upper)` allowed for `offdelta`.
    pub fn bounds(&self) -> Result<(i128, i128), AccountError> {
        let lower = -to_i128(self.token_id, self.left_credit_limit)?;
        let upper = to_i128(self.token_id, self.collateral)?
            .checked_add(to_i128(self.token_id, self.right_credit_limit)?)
            .ok_or(AccountError::Overflow(self.token_id))?;
        Ok((lower, upper))
    }

    /// Check the credit-line invariant.
    pub fn check(&self) -> Result<(), AccountError> {
        let (lower, upper) = self.bounds()?;
        if self.offdelta < lower || self.offdelta > upper {
            return Err(AccountError::CreditLimitViolation {
                token_id: self.token_id,
                offdelta: self.offdelta,
                lower,
                upper,
            });
        }
        Ok(())
    }

    /// Shift `offdelta` by `amount` (signed), checked.
    pub fn shift(&mut self, amount: i128) -> Result<(), AccountError> {
        self.offdelta = self
            .offdelta
            .checked_add(amount)
            .ok_or(AccountError::Overflow(self.token_id))?;
        Ok(())
    }

    pub(crate) fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u32(self.token_id)
            .put_i128(self.offdelta)
            .put_u128(self.collateral)
            .put_u128(self.left_credit_limit)
            .put_u128(self.right_credit_limit);
    }
}
