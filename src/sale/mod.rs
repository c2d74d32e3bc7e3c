use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenError};
use crate::ledger::{Amount, UNIT};

/// 0.001 native per whole token.
pub const DEFAULT_SALE_PRICE: Amount = UNIT / 1_000;

/// Fixed-rate sale of ledger units for native currency.
///
/// The price is in native minimal units per whole token. Both purchase paths
/// require the payment to match exactly; neither keeps change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEngine {
    price: Amount,
}

impl SaleEngine {
    pub fn new(price: Amount) -> Result<Self> {
        if price == 0 {
            return Err(TokenError::InvalidPrice);
        }
        Ok(Self { price })
    }

    pub fn price(&self) -> Amount {
        self.price
    }

    /// Native payment owed for `amount` minimal token units, truncated.
    ///
    /// Whole tokens and the fractional remainder are priced separately so the
    /// intermediate product stays within range whenever the quote does.
    pub fn quote(&self, amount: Amount) -> Result<Amount> {
        let whole = (amount / UNIT)
            .checked_mul(self.price)
            .ok_or(TokenError::ArithmeticOverflow)?;
        let fraction = (amount % UNIT)
            .checked_mul(self.price)
            .ok_or(TokenError::ArithmeticOverflow)?
            / UNIT;
        whole
            .checked_add(fraction)
            .ok_or(TokenError::ArithmeticOverflow)
    }

    /// Explicit purchase: validates `payment` against the quote for `amount`
    /// and returns the units to credit.
    pub fn buy(&self, amount: Amount, payment: Amount) -> Result<Amount> {
        if amount == 0 {
            return Err(TokenError::ZeroAmount);
        }
        let required = self.quote(amount)?;
        // amounts below one priced unit would otherwise be free
        if required == 0 || payment != required {
            return Err(TokenError::IncorrectPayment {
                sent: payment,
                required,
            });
        }
        Ok(amount)
    }

    /// Bare payment: `payment / price` units, accepted only when that
    /// division is exact and non-zero.
    pub fn units_for_payment(&self, payment: Amount) -> Result<Amount> {
        let units = payment / self.price;
        let remainder = payment % self.price;
        if units == 0 || remainder != 0 {
            return Err(TokenError::IncorrectPayment {
                sent: payment,
                required: (units.max(1)).saturating_mul(self.price),
            });
        }
        Ok(units)
    }
}

impl Default for SaleEngine {
    fn default() -> Self {
        Self {
            price: DEFAULT_SALE_PRICE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_purchase_requires_exact_quote() {
        let sale = SaleEngine::default();
        let fifty = 50 * UNIT;
        let required = fifty * DEFAULT_SALE_PRICE / UNIT;
        assert_eq!(required, UNIT / 20);
        assert_eq!(sale.buy(fifty, required).unwrap(), fifty);

        let err = sale.buy(fifty, UNIT / 100).unwrap_err();
        assert_eq!(
            err,
            TokenError::IncorrectPayment {
                sent: UNIT / 100,
                required
            }
        );
        assert!(sale.buy(fifty, required + 1).is_err());
    }

    #[test]
    fn dust_and_zero_purchases_are_rejected() {
        let sale = SaleEngine::default();
        assert_eq!(sale.buy(0, 0), Err(TokenError::ZeroAmount));
        // 999 minimal units cost less than one native minimal unit
        assert!(matches!(
            sale.buy(999, 0),
            Err(TokenError::IncorrectPayment { required: 0, .. })
        ));
    }

    #[test]
    fn bare_payment_converts_at_price() {
        let sale = SaleEngine::default();
        let payment = UNIT / 100; // 0.01 native
        assert_eq!(sale.units_for_payment(payment).unwrap(), 10);
    }

    #[test]
    fn bare_payment_below_price_or_with_change_is_rejected() {
        let sale = SaleEngine::default();
        assert!(matches!(
            sale.units_for_payment(DEFAULT_SALE_PRICE - 1),
            Err(TokenError::IncorrectPayment { .. })
        ));
        assert!(sale.units_for_payment(0).is_err());
        assert!(sale.units_for_payment(DEFAULT_SALE_PRICE * 3 + 7).is_err());
    }

    #[test]
    fn zero_price_is_invalid() {
        assert_eq!(SaleEngine::new(0), Err(TokenError::InvalidPrice));
    }

    #[test]
    fn quote_overflow_is_reported() {
        let sale = SaleEngine::new(Amount::MAX).unwrap();
        assert_eq!(sale.quote(2 * UNIT), Err(TokenError::ArithmeticOverflow));
    }

    #[test]
    fn large_purchase_is_quoted_without_overflow() {
        let sale = SaleEngine::default();
        let amount = 400_000 * UNIT;
        assert_eq!(sale.quote(amount).unwrap(), 400 * UNIT);
        assert_eq!(sale.buy(amount, 400 * UNIT).unwrap(), amount);
        // every amount is priceable at the default rate
        assert!(sale.quote(Amount::MAX).is_ok());
    }

    #[test]
    fn split_quote_matches_plain_truncation() {
        let sale = SaleEngine::new(3 * UNIT / 7).unwrap();
        let amounts = [
            1,
            999,
            UNIT - 1,
            UNIT,
            UNIT + 1,
            5 * UNIT / 3,
            123 * UNIT + 678,
        ];
        for amount in amounts {
            assert_eq!(sale.quote(amount).unwrap(), amount * sale.price() / UNIT);
        }
    }
}
