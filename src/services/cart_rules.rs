use chrono::Utc;
use regex::Regex;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::info;
use uuid::Uuid;

use crate::config::CheckoutSettings;
use crate::entities::{cart_rule, order, order_cart_rule};
use crate::errors::CheckoutError;
use crate::money::{round, TaxedAmount};
use crate::services::checkout::CheckoutContext;
use crate::services::pricing::{convert_amount, PricingBreakdown};

/// One voucher's recorded effect on one order, kept for the confirmation
/// email summary.
#[derive(Debug, Clone)]
pub struct AppliedRuleLine {
    pub name: String,
    pub value: TaxedAmount,
}

pub struct CartRuleOutcome {
    pub lines: Vec<AppliedRuleLine>,
    /// Remainder vouchers issued while applying rules to this order.
    pub issued: Vec<cart_rule::Model>,
}

fn suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-(\d{1,2})-(\d{1,2})$").expect("static pattern"))
}

/// Derives the code of a remainder voucher from its parent's.
///
/// Codeless rules get a 16-character digest-derived code. Coded rules get a
/// `-2` suffix; a resulting `-N-N` tail with equal numbers collapses into
/// `-(N+1)`, so re-splitting an already split voucher counts up instead of
/// growing the code without bound.
pub fn derive_remainder_code(
    base: &str,
    order_id: Uuid,
    customer_id: Option<Uuid>,
    rule_id: Uuid,
) -> String {
    if base.is_empty() {
        let mut hasher = Sha256::new();
        hasher.update(order_id.as_bytes());
        if let Some(customer_id) = customer_id {
            hasher.update(customer_id.as_bytes());
        }
        hasher.update(rule_id.as_bytes());
        return hex::encode(hasher.finalize())[..16].to_uppercase();
    }
    let candidate = format!("{base}-2");
    if let Some(caps) = suffix_pattern().captures(&candidate) {
        let first: u32 = caps[1].parse().unwrap_or(0);
        let second: u32 = caps[2].parse().unwrap_or(0);
        if first == second {
            let matched = caps.get(0).expect("whole match");
            return format!("{}-{}", &candidate[..matched.start()], first + 1);
        }
    }
    candidate
}

/// Records the cart's rules against one materialized order.
///
/// Per rule this writes the order/rule junction row, decrements the rule's
/// remaining quantity once per validation call, and, when a partial-use
/// amount voucher exceeds what this single order can absorb, issues a
/// remainder voucher over the unspent part.
pub async fn apply_cart_rules<C: ConnectionTrait>(
    conn: &C,
    settings: &CheckoutSettings,
    ctx: &CheckoutContext,
    order: &order::Model,
    breakdown: &PricingBreakdown,
    sibling_count: usize,
    consumed: &mut HashSet<Uuid>,
) -> Result<CartRuleOutcome, CheckoutError> {
    let precision = settings.precision;
    let mode = settings.rounding_mode;
    let in_dead_state = order.current_state_id == settings.error_state_id
        || order.current_state_id == settings.canceled_state_id;

    let mut lines = Vec::new();
    let mut issued = Vec::new();
    let mut reductions = TaxedAmount::ZERO;

    for (rule, effect) in ctx.rules.iter().zip(&breakdown.rule_effects) {
        if effect.value.is_zero() && rule.gift_product_id.is_none() {
            continue;
        }

        let mut value = effect.value;

        // A partial-use amount voucher larger than this order's share is
        // split: the order keeps what it can absorb, the rest comes back as
        // a fresh single-use voucher. Only meaningful for single-package
        // carts, where the voucher has no sibling order to spill into.
        if sibling_count == 1 && rule.partial_use && rule.is_amount_reduction() {
            let converted = convert_amount(
                rule.reduction_amount,
                &rule.reduction_currency,
                &order.currency,
                &ctx.rates,
            );
            let absorbed = if rule.reduction_tax {
                value.tax_incl
            } else {
                value.tax_excl
            };
            let mut remaining = round(converted - absorbed, precision, mode);
            if remaining > rust_decimal::Decimal::ZERO {
                if rule.free_shipping {
                    remaining -= if rule.reduction_tax {
                        order.total_shipping_tax_incl
                    } else {
                        order.total_shipping_tax_excl
                    };
                }
                if remaining > rust_decimal::Decimal::ZERO {
                    let guest = ctx.customer.as_ref().map(|c| c.guest).unwrap_or(true);
                    let now = Utc::now();
                    let voucher = cart_rule::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        code: Set(derive_remainder_code(
                            &rule.code,
                            order.id,
                            order.customer_id,
                            rule.id,
                        )),
                        name: Set(rule.name.clone()),
                        active: Set(true),
                        reduction_amount: Set(remaining),
                        reduction_percent: Set(rust_decimal::Decimal::ZERO),
                        reduction_tax: Set(rule.reduction_tax),
                        reduction_currency: Set(order.currency.clone()),
                        free_shipping: Set(rule.free_shipping),
                        partial_use: Set(rule.partial_use),
                        quantity: Set(1),
                        quantity_per_user: Set(1),
                        customer_id: Set(if guest { None } else { order.customer_id }),
                        date_from: Set(now),
                        date_to: Set(rule.date_to),
                        minimum_amount: Set(rule.minimum_amount),
                        gift_product_id: Set(rule.gift_product_id),
                        created_at: Set(now),
                    }
                    .insert(conn)
                    .await?;
                    info!(
                        order_id = %order.id,
                        cart_rule_id = %voucher.id,
                        code = %voucher.code,
                        amount = %voucher.reduction_amount,
                        "issued remainder voucher"
                    );
                    issued.push(voucher);

                    // After the split the parent voucher covers everything
                    // still payable on products (plus shipping when free).
                    value = TaxedAmount::new(
                        order.total_products_tax_incl - reductions.tax_incl,
                        order.total_products_tax_excl - reductions.tax_excl,
                    );
                    if rule.free_shipping {
                        value += TaxedAmount::new(
                            order.total_shipping_tax_incl,
                            order.total_shipping_tax_excl,
                        );
                    }
                    value = value.rounded(precision, mode);
                }
            }
        }

        reductions += value;

        order_cart_rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            cart_rule_id: Set(rule.id),
            name: Set(rule.name.clone()),
            value_tax_incl: Set(value.tax_incl),
            value_tax_excl: Set(value.tax_excl),
            free_shipping: Set(rule.free_shipping),
        }
        .insert(conn)
        .await?;

        // One decrement per validation call, and none when the order landed
        // in the payment-error or canceled state.
        if !in_dead_state && consumed.insert(rule.id) {
            let mut active: cart_rule::ActiveModel = rule.clone().into();
            active.quantity = Set((rule.quantity - 1).max(0));
            active.update(conn).await?;
        }

        lines.push(AppliedRuleLine {
            name: rule.name.clone(),
            value,
        });
    }

    Ok(CartRuleOutcome { lines, issued })
}
