use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::{carrier, cart_item, cart_rule};
use crate::money::{OrderTotals, RoundingMode, TaxedAmount};

/// Everything the calculator needs to price one package: the product lines
/// scoped to a single delivery address, the surviving cart rules, and the
/// assigned carrier.
pub struct PricingScope<'a> {
    pub lines: &'a [cart_item::Model],
    pub rules: &'a [cart_rule::Model],
    pub carrier: Option<&'a carrier::Model>,
    /// Percent rate of the tax jurisdiction, applied to shipping and wrapping.
    pub jurisdiction_tax_rate: Decimal,
    /// Tax-excluded gift-wrapping fee; zero when the cart is not a gift.
    pub wrapping_fee: Decimal,
    pub cart_currency: &'a str,
    /// Conversion rates per currency code, relative to the default currency.
    pub rates: &'a HashMap<String, Decimal>,
}

/// Monetary effect of one cart rule on the priced scope.
#[derive(Debug, Clone)]
pub struct RuleEffect {
    pub rule_id: Uuid,
    pub name: String,
    pub value: TaxedAmount,
    pub free_shipping: bool,
}

#[derive(Debug, Clone)]
pub struct PricingBreakdown {
    pub totals: OrderTotals,
    pub rule_effects: Vec<RuleEffect>,
}

/// The cart pricing calculator.
///
/// Implementations must be pure: re-invocable any number of times per request
/// with identical results and no side effects.
pub trait PricingCalculator: Send + Sync {
    fn compute(&self, scope: &PricingScope<'_>, precision: u32, mode: RoundingMode)
        -> PricingBreakdown;
}

/// Converts an amount between currencies through per-code conversion rates.
/// Unknown codes fall back to a rate of 1.
pub fn convert_amount(
    amount: Decimal,
    from: &str,
    to: &str,
    rates: &HashMap<String, Decimal>,
) -> Decimal {
    if from == to {
        return amount;
    }
    let rate_of = |code: &str| {
        rates
            .get(code)
            .copied()
            .filter(|r| !r.is_zero())
            .unwrap_or(Decimal::ONE)
    };
    amount / rate_of(from) * rate_of(to)
}

/// Deterministic default calculator.
///
/// Rules are applied in attachment order against the products total still
/// unreduced by earlier rules; amount rules are converted into the cart
/// currency first and clamped so a rule never discounts more than remains.
#[derive(Debug, Clone, Default)]
pub struct DefaultPricingCalculator;

impl PricingCalculator for DefaultPricingCalculator {
    fn compute(
        &self,
        scope: &PricingScope<'_>,
        precision: u32,
        mode: RoundingMode,
    ) -> PricingBreakdown {
        let mut products = TaxedAmount::ZERO;
        let mut needs_shipping = false;
        for line in scope.lines {
            let line_excl = line.unit_price_tax_excl * Decimal::from(line.quantity);
            products += TaxedAmount::from_tax_excl(line_excl, line.tax_rate);
            needs_shipping |= !line.is_virtual;
        }

        let shipping = match scope.carrier {
            Some(carrier) if needs_shipping => {
                TaxedAmount::from_tax_excl(carrier.shipping_rate, scope.jurisdiction_tax_rate)
            }
            _ => TaxedAmount::ZERO,
        };
        let wrapping =
            TaxedAmount::from_tax_excl(scope.wrapping_fee, scope.jurisdiction_tax_rate);

        // Effective products tax ratio, used to translate amount reductions
        // between the two tax forms.
        let ratio = if products.tax_excl.is_zero() {
            Decimal::ONE
        } else {
            products.tax_incl / products.tax_excl
        };

        let mut applied = TaxedAmount::ZERO;
        let mut rule_effects = Vec::with_capacity(scope.rules.len());
        for rule in scope.rules {
            let remaining = (products - applied).max(TaxedAmount::ZERO);

            let product_part = if rule.reduction_percent > Decimal::ZERO {
                TaxedAmount::new(
                    remaining.tax_incl * rule.reduction_percent / Decimal::ONE_HUNDRED,
                    remaining.tax_excl * rule.reduction_percent / Decimal::ONE_HUNDRED,
                )
            } else if rule.reduction_amount > Decimal::ZERO {
                let converted = convert_amount(
                    rule.reduction_amount,
                    &rule.reduction_currency,
                    scope.cart_currency,
                    scope.rates,
                );
                if rule.reduction_tax {
                    let tax_incl = converted.min(remaining.tax_incl);
                    TaxedAmount::new(tax_incl, tax_incl / ratio)
                } else {
                    let tax_excl = converted.min(remaining.tax_excl);
                    TaxedAmount::new(tax_excl * ratio, tax_excl)
                }
            } else {
                TaxedAmount::ZERO
            };

            applied += product_part;

            let mut value = product_part;
            if rule.free_shipping {
                value += shipping;
            }

            rule_effects.push(RuleEffect {
                rule_id: rule.id,
                name: rule.name.clone(),
                value: value.rounded(precision, mode),
                free_shipping: rule.free_shipping,
            });
        }

        let discounts = rule_effects
            .iter()
            .fold(TaxedAmount::ZERO, |acc, e| acc + e.value);
        let paid = TaxedAmount::new(
            (products.tax_incl - discounts.tax_incl + shipping.tax_incl + wrapping.tax_incl)
                .max(Decimal::ZERO),
            (products.tax_excl - discounts.tax_excl + shipping.tax_excl + wrapping.tax_excl)
                .max(Decimal::ZERO),
        );

        PricingBreakdown {
            totals: OrderTotals {
                products,
                discounts,
                shipping,
                wrapping,
                paid,
            }
            .rounded(precision, mode),
            rule_effects,
        }
    }
}
