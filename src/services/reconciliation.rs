use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::entities::{cart, cart_coupon, cart_rule, order, order_cart_rule};
use crate::errors::CheckoutError;
use crate::money::TaxedAmount;

/// Per-request cache of voucher usage counts.
///
/// One instance lives for a single validation call and is dropped with it;
/// usage counts are never shared across requests. Cleared before and after
/// reconciliation so the window between them reads fresh rows.
#[derive(Debug, Default)]
pub struct RuleUsageCache {
    counts: HashMap<(Uuid, Uuid), u64>,
}

impl RuleUsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// How many placed orders of `customer_id` already consumed `rule_id`.
    pub async fn used_by_customer<C: ConnectionTrait>(
        &mut self,
        conn: &C,
        rule_id: Uuid,
        customer_id: Uuid,
    ) -> Result<u64, CheckoutError> {
        if let Some(count) = self.counts.get(&(rule_id, customer_id)) {
            return Ok(*count);
        }
        let count = order_cart_rule::Entity::find()
            .filter(order_cart_rule::Column::CartRuleId.eq(rule_id))
            .inner_join(order::Entity)
            .filter(order::Column::CustomerId.eq(customer_id))
            .count(conn)
            .await?;
        self.counts.insert((rule_id, customer_id), count);
        Ok(count)
    }
}

fn invalid_reason(
    rule: &cart_rule::Model,
    cart_customer_id: Option<Uuid>,
    products: TaxedAmount,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    if !rule.active {
        return Some("inactive");
    }
    if now < rule.date_from || now > rule.date_to {
        return Some("outside validity window");
    }
    if rule.quantity <= 0 {
        return Some("exhausted");
    }
    if rule.minimum_amount > products.tax_incl {
        return Some("cart below minimum amount");
    }
    if let Some(owner) = rule.customer_id {
        if cart_customer_id != Some(owner) {
            return Some("bound to another customer");
        }
    }
    None
}

/// Re-checks every voucher attached to the cart and strips the ones that are
/// no longer valid, detaching them from the cart as well. Surviving rules stay
/// in `rules`, in their original attachment order.
pub async fn reconcile_cart_rules<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
    products: TaxedAmount,
    rules: &mut Vec<cart_rule::Model>,
    cache: &mut RuleUsageCache,
    now: DateTime<Utc>,
) -> Result<Vec<(Uuid, &'static str)>, CheckoutError> {
    cache.clear();

    let mut stripped = Vec::new();
    let mut kept = Vec::with_capacity(rules.len());
    for rule in rules.drain(..) {
        let mut reason = invalid_reason(&rule, cart.customer_id, products, now);
        if reason.is_none() {
            if let Some(customer_id) = cart.customer_id {
                let uses = cache.used_by_customer(conn, rule.id, customer_id).await?;
                if uses >= rule.quantity_per_user as u64 {
                    reason = Some("per-customer cap reached");
                }
            }
        }
        match reason {
            None => kept.push(rule),
            Some(reason) => {
                warn!(
                    cart_id = %cart.id,
                    cart_rule_id = %rule.id,
                    code = %rule.code,
                    reason,
                    "stripping invalid voucher from cart"
                );
                cart_coupon::Entity::delete_many()
                    .filter(cart_coupon::Column::CartId.eq(cart.id))
                    .filter(cart_coupon::Column::CartRuleId.eq(rule.id))
                    .exec(conn)
                    .await?;
                stripped.push((rule.id, reason));
            }
        }
    }
    *rules = kept;

    cache.clear();
    Ok(stripped)
}
