use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub};

/// Midpoint strategy for monetary rounding.
///
/// The mode is configuration, read at call time; the workflow never assumes a
/// particular strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoundingMode {
    /// Round half away from zero.
    HalfUp,
    /// Round half toward zero.
    HalfDown,
    /// Banker's rounding.
    HalfEven,
}

impl RoundingMode {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// Rounds a monetary value to `precision` decimal places.
pub fn round(value: Decimal, precision: u32, mode: RoundingMode) -> Decimal {
    value.round_dp_with_strategy(precision, mode.strategy())
}

/// Renders a monetary value as a fixed-precision decimal string.
pub fn format_amount(value: Decimal, precision: u32, mode: RoundingMode) -> String {
    let mut rounded = round(value, precision, mode);
    rounded.rescale(precision);
    rounded.to_string()
}

/// Compares two amounts by their fixed-precision string rendering.
///
/// String comparison at the configured precision sidesteps binary-float
/// artifacts in amounts that travelled through external payment gateways.
pub fn amounts_match(left: Decimal, right: Decimal, precision: u32, mode: RoundingMode) -> bool {
    format_amount(left, precision, mode) == format_amount(right, precision, mode)
}

/// Applies a percent tax rate to a tax-excluded amount.
pub fn with_tax(tax_excl: Decimal, rate_percent: Decimal) -> Decimal {
    tax_excl * (Decimal::ONE + rate_percent / Decimal::ONE_HUNDRED)
}

/// A monetary amount carried in both tax-included and tax-excluded form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxedAmount {
    pub tax_incl: Decimal,
    pub tax_excl: Decimal,
}

impl TaxedAmount {
    pub const ZERO: TaxedAmount = TaxedAmount {
        tax_incl: Decimal::ZERO,
        tax_excl: Decimal::ZERO,
    };

    pub fn new(tax_incl: Decimal, tax_excl: Decimal) -> Self {
        Self { tax_incl, tax_excl }
    }

    /// Builds the pair from a tax-excluded amount and a percent rate.
    pub fn from_tax_excl(tax_excl: Decimal, rate_percent: Decimal) -> Self {
        Self {
            tax_incl: with_tax(tax_excl, rate_percent),
            tax_excl,
        }
    }

    pub fn rounded(self, precision: u32, mode: RoundingMode) -> Self {
        Self {
            tax_incl: round(self.tax_incl, precision, mode),
            tax_excl: round(self.tax_excl, precision, mode),
        }
    }

    pub fn is_zero(self) -> bool {
        self.tax_incl.is_zero() && self.tax_excl.is_zero()
    }

    pub fn max(self, other: Self) -> Self {
        Self {
            tax_incl: self.tax_incl.max(other.tax_incl),
            tax_excl: self.tax_excl.max(other.tax_excl),
        }
    }
}

impl Add for TaxedAmount {
    type Output = TaxedAmount;

    fn add(self, rhs: Self) -> Self {
        Self {
            tax_incl: self.tax_incl + rhs.tax_incl,
            tax_excl: self.tax_excl + rhs.tax_excl,
        }
    }
}

impl AddAssign for TaxedAmount {
    fn add_assign(&mut self, rhs: Self) {
        self.tax_incl += rhs.tax_incl;
        self.tax_excl += rhs.tax_excl;
    }
}

impl Sub for TaxedAmount {
    type Output = TaxedAmount;

    fn sub(self, rhs: Self) -> Self {
        Self {
            tax_incl: self.tax_incl - rhs.tax_incl,
            tax_excl: self.tax_excl - rhs.tax_excl,
        }
    }
}

/// The seven total pairs carried by every order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTotals {
    pub products: TaxedAmount,
    pub discounts: TaxedAmount,
    pub shipping: TaxedAmount,
    pub wrapping: TaxedAmount,
    pub paid: TaxedAmount,
}

impl OrderTotals {
    pub fn rounded(self, precision: u32, mode: RoundingMode) -> Self {
        Self {
            products: self.products.rounded(precision, mode),
            discounts: self.discounts.rounded(precision, mode),
            shipping: self.shipping.rounded(precision, mode),
            wrapping: self.wrapping.rounded(precision, mode),
            paid: self.paid.rounded(precision, mode),
        }
    }
}
