//! Currencies a receiving VASP can settle in, and amount conversion.
//!
//! A [`Currency`] is an immutable value object. `multiplier` is the number of
//! millisatoshis one smallest unit of the currency is worth. The sendable
//! bounds apply to PayRequest amounts, which are expressed in the currency's
//! smallest unit (cents for USD, satoshis for SAT).
//!
//! Integer conversion (`amount * multiplier`) is exact. Conversions through
//! [`Decimal`] round half away from zero to whole millisatoshis or whole units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors produced while building currencies or converting amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    /// The currency code is empty.
    #[error("currency code must not be empty")]
    EmptyCode,
    /// The multiplier is zero.
    #[error("multiplier for {code} must be at least 1")]
    ZeroMultiplier {
        /// Currency code.
        code: String,
    },
    /// `min_sendable` exceeds `max_sendable`.
    #[error("min sendable {min} exceeds max sendable {max} for {code}")]
    InvertedBounds {
        /// Currency code.
        code: String,
        /// Lower bound.
        min: u64,
        /// Upper bound.
        max: u64,
    },
    /// The amount lies outside the sendable bounds.
    #[error("amount {amount} {code} outside [{min}, {max}]")]
    OutOfRange {
        /// Currency code.
        code: String,
        /// Requested amount.
        amount: u64,
        /// Lower bound.
        min: u64,
        /// Upper bound.
        max: u64,
    },
    /// The converted value does not fit in a `u64`.
    #[error("amount overflows millisatoshi range")]
    Overflow,
    /// Negative amounts cannot be converted.
    #[error("amount must not be negative")]
    Negative,
}

/// A currency offered by a receiving VASP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCurrency")]
pub struct Currency {
    code: String,
    name: String,
    symbol: String,
    multiplier: u64,
    min_sendable: u64,
    max_sendable: u64,
    decimals: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCurrency {
    code: String,
    name: String,
    symbol: String,
    multiplier: u64,
    min_sendable: u64,
    max_sendable: u64,
    #[serde(default)]
    decimals: u32,
}

impl TryFrom<RawCurrency> for Currency {
    type Error = CurrencyError;

    fn try_from(raw: RawCurrency) -> Result<Self, Self::Error> {
        Self::new(
            raw.code,
            raw.name,
            raw.symbol,
            raw.multiplier,
            raw.min_sendable,
            raw.max_sendable,
        )
        .map(|c| c.with_decimals(raw.decimals))
    }
}

impl Currency {
    /// Creates a currency, validating the multiplier and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError`] if the code is empty, the multiplier is zero,
    /// or `min_sendable > max_sendable`.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
        multiplier: u64,
        min_sendable: u64,
        max_sendable: u64,
    ) -> Result<Self, CurrencyError> {
        let code = code.into();
        if code.is_empty() {
            return Err(CurrencyError::EmptyCode);
        }
        if multiplier == 0 {
            return Err(CurrencyError::ZeroMultiplier { code });
        }
        if min_sendable > max_sendable {
            return Err(CurrencyError::InvertedBounds {
                code,
                min: min_sendable,
                max: max_sendable,
            });
        }
        Ok(Self {
            code,
            name: name.into(),
            symbol: symbol.into(),
            multiplier,
            min_sendable,
            max_sendable,
            decimals: 0,
        })
    }

    /// Satoshis: 1000 msats per unit, no decimals.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::InvertedBounds`] if `min_sendable > max_sendable`.
    pub fn sat(min_sendable: u64, max_sendable: u64) -> Result<Self, CurrencyError> {
        Self::new("SAT", "Satoshis", "SAT", 1_000, min_sendable, max_sendable)
    }

    /// Sets the number of display decimals of the smallest unit.
    #[must_use]
    pub const fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Currency code, e.g. `USD` or `SAT`.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Millisatoshis per smallest unit.
    #[must_use]
    pub const fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// Smallest sendable amount, in the currency's smallest unit.
    #[must_use]
    pub const fn min_sendable(&self) -> u64 {
        self.min_sendable
    }

    /// Largest sendable amount, in the currency's smallest unit.
    #[must_use]
    pub const fn max_sendable(&self) -> u64 {
        self.max_sendable
    }

    /// Number of decimals used when displaying the smallest unit.
    #[must_use]
    pub const fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Checks `amount` against `[min_sendable, max_sendable]`.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::OutOfRange`] when the amount is outside the bounds.
    pub fn check_amount(&self, amount: u64) -> Result<(), CurrencyError> {
        if (self.min_sendable..=self.max_sendable).contains(&amount) {
            Ok(())
        } else {
            Err(CurrencyError::OutOfRange {
                code: self.code.clone(),
                amount,
                min: self.min_sendable,
                max: self.max_sendable,
            })
        }
    }

    /// Converts a whole amount in the smallest unit to millisatoshis.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::Overflow`] if the product does not fit in `u64`.
    pub const fn to_msats(&self, amount: u64) -> Result<u64, CurrencyError> {
        match amount.checked_mul(self.multiplier) {
            Some(msats) => Ok(msats),
            None => Err(CurrencyError::Overflow),
        }
    }

    /// Converts a fractional amount to millisatoshis, rounding half up.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::Negative`] for negative input and
    /// [`CurrencyError::Overflow`] if the result does not fit in `u64`.
    pub fn decimal_to_msats(&self, amount: Decimal) -> Result<u64, CurrencyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CurrencyError::Negative);
        }
        amount
            .checked_mul(Decimal::from(self.multiplier))
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_u64())
            .ok_or(CurrencyError::Overflow)
    }

    /// Converts millisatoshis back to an exact amount in the smallest unit.
    #[must_use]
    pub fn msats_to_amount(&self, msats: u64) -> Decimal {
        Decimal::from(msats) / Decimal::from(self.multiplier)
    }

    /// Converts millisatoshis to whole smallest units, rounding half up.
    #[must_use]
    pub fn msats_to_amount_rounded(&self, msats: u64) -> u64 {
        let whole = msats / self.multiplier;
        let remainder = msats % self.multiplier;
        if remainder.saturating_mul(2) >= self.multiplier {
            whole + 1
        } else {
            whole
        }
    }
}
