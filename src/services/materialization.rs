use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CheckoutSettings, TaxAddressType};
use crate::entities::{carrier, cart_item, order, order_carrier, order_detail, order_state};
use crate::errors::CheckoutError;
use crate::money::{self, round, with_tax};
use crate::services::checkout::CheckoutContext;
use crate::services::pricing::{PricingBreakdown, PricingCalculator, PricingScope};

/// One future order: the cart lines of a single delivery address plus the
/// carrier resolved for it.
#[derive(Debug, Clone)]
pub struct PackagePlan {
    pub address_id: Uuid,
    pub carrier_id: Option<Uuid>,
    pub lines: Vec<cart_item::Model>,
}

/// Call-scoped order attributes shared by every package of the cart.
pub struct OrderDraft<'a> {
    pub reference: &'a str,
    pub payment_method: &'a str,
    pub module_name: &'a str,
    pub target_state: &'a order_state::Model,
    /// Amount the gateway claims was captured.
    pub amount_paid: Decimal,
    /// Payable total computed over all packages of the cart.
    pub cart_total_paid: Decimal,
}

pub struct MaterializedOrder {
    pub order: order::Model,
    pub details: Vec<order_detail::Model>,
    pub breakdown: PricingBreakdown,
    /// Whether the paid-amount check forced the payment-error state.
    pub downgraded: bool,
}

/// Decides the state a new order lands in.
///
/// A captured amount that disagrees with the computed total downgrades the
/// order to the payment-error state, but only when the requested state is
/// logable: non-logable states make no accounting claim worth disputing.
pub fn effective_state(
    settings: &CheckoutSettings,
    target_state: &order_state::Model,
    cart_total_paid: Decimal,
    amount_paid: Decimal,
) -> (Uuid, bool) {
    let matches = money::amounts_match(
        cart_total_paid,
        amount_paid,
        settings.precision,
        settings.rounding_mode,
    );
    if !matches && target_state.logable {
        (settings.error_state_id, true)
    } else {
        (target_state.id, false)
    }
}

/// A package priced in its tax jurisdiction, before any row is written.
pub struct PackagePricing {
    pub breakdown: PricingBreakdown,
    pub jurisdiction_tax_rate: Decimal,
    pub carrier_id: Option<Uuid>,
}

/// Prices one package, resolving its tax jurisdiction first.
///
/// This is the only place the jurisdiction country is checked, so an
/// inactive country aborts before anything is persisted.
pub fn price_package(
    settings: &CheckoutSettings,
    pricing: &dyn PricingCalculator,
    ctx: &CheckoutContext,
    package: &PackagePlan,
) -> Result<PackagePricing, CheckoutError> {
    let tax_address_id = match settings.tax_address_type {
        TaxAddressType::Delivery => package.address_id,
        TaxAddressType::Invoice => ctx.cart.invoice_address_id,
    };
    let tax_address = ctx
        .addresses
        .get(&tax_address_id)
        .ok_or_else(|| CheckoutError::NotFound(format!("address {tax_address_id}")))?;
    let country = ctx
        .countries
        .get(&tax_address.country_code)
        .ok_or_else(|| CheckoutError::NotFound(format!("country {}", tax_address.country_code)))?;
    if !country.active {
        return Err(CheckoutError::InactiveCountry(country.code.clone()));
    }

    let assigned_carrier: Option<&carrier::Model> = package
        .carrier_id
        .and_then(|id| ctx.carriers.iter().find(|c| c.id == id));

    let wrapping_fee = if ctx.cart.gift {
        settings.wrapping_fee
    } else {
        Decimal::ZERO
    };
    let breakdown = pricing.compute(
        &PricingScope {
            lines: &package.lines,
            rules: &ctx.rules,
            carrier: assigned_carrier,
            jurisdiction_tax_rate: country.tax_rate,
            wrapping_fee,
            cart_currency: &ctx.cart.currency,
            rates: &ctx.rates,
        },
        settings.precision,
        settings.rounding_mode,
    );
    Ok(PackagePricing {
        breakdown,
        jurisdiction_tax_rate: country.tax_rate,
        carrier_id: assigned_carrier.map(|c| c.id),
    })
}

/// Persists one order for one package: the order row with its seven total
/// pairs, one detail row per cart line, and the carrier assignment.
pub async fn materialize_order<C: ConnectionTrait>(
    conn: &C,
    settings: &CheckoutSettings,
    pricing: &dyn PricingCalculator,
    ctx: &CheckoutContext,
    package: &PackagePlan,
    draft: &OrderDraft<'_>,
) -> Result<MaterializedOrder, CheckoutError> {
    let PackagePricing {
        breakdown,
        jurisdiction_tax_rate,
        carrier_id,
    } = price_package(settings, pricing, ctx, package)?;

    let (state_id, downgraded) = effective_state(
        settings,
        draft.target_state,
        draft.cart_total_paid,
        draft.amount_paid,
    );
    if downgraded {
        warn!(
            cart_id = %ctx.cart.id,
            expected = %draft.cart_total_paid,
            paid = %draft.amount_paid,
            "paid amount does not reconcile, placing order in payment-error state"
        );
    }

    let now = Utc::now();
    let totals = &breakdown.totals;
    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(ctx.cart.id),
        customer_id: Set(ctx.cart.customer_id),
        currency: Set(ctx.cart.currency.clone()),
        conversion_rate: Set(ctx.conversion_rate),
        reference: Set(draft.reference.to_string()),
        delivery_address_id: Set(package.address_id),
        invoice_address_id: Set(ctx.cart.invoice_address_id),
        carrier_id: Set(carrier_id),
        carrier_tax_rate: Set(if carrier_id.is_some() {
            jurisdiction_tax_rate
        } else {
            Decimal::ZERO
        }),
        current_state_id: Set(state_id),
        payment_method: Set(draft.payment_method.to_string()),
        module: Set(draft.module_name.to_string()),
        secure_key: Set(ctx.cart.secure_key.clone()),
        gift: Set(ctx.cart.gift),
        gift_message: Set(ctx.cart.gift_message.clone()),
        total_products_tax_incl: Set(totals.products.tax_incl),
        total_products_tax_excl: Set(totals.products.tax_excl),
        total_discounts_tax_incl: Set(totals.discounts.tax_incl),
        total_discounts_tax_excl: Set(totals.discounts.tax_excl),
        total_shipping_tax_incl: Set(totals.shipping.tax_incl),
        total_shipping_tax_excl: Set(totals.shipping.tax_excl),
        total_wrapping_tax_incl: Set(totals.wrapping.tax_incl),
        total_wrapping_tax_excl: Set(totals.wrapping.tax_excl),
        total_paid_tax_incl: Set(totals.paid.tax_incl),
        total_paid_tax_excl: Set(totals.paid.tax_excl),
        total_paid_real: Set(Decimal::ZERO),
        round_precision: Set(settings.precision as i32),
        round_mode: Set(settings.rounding_mode.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let order = order.insert(conn).await.map_err(|e| {
        error!(cart_id = %ctx.cart.id, error = %e, "order creation failed");
        CheckoutError::OrderPersistence(e.to_string())
    })?;
    info!(
        order_id = %order.id,
        reference = %order.reference,
        total_paid = %order.total_paid_tax_incl,
        "order created"
    );

    let mut details = Vec::with_capacity(package.lines.len());
    for line in &package.lines {
        let precision = settings.precision;
        let mode = settings.rounding_mode;
        let unit_tax_incl = round(with_tax(line.unit_price_tax_excl, line.tax_rate), precision, mode);
        let quantity = Decimal::from(line.quantity);
        let detail = order_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            reference: Set(line.reference.clone()),
            quantity: Set(line.quantity),
            unit_price_tax_incl: Set(unit_tax_incl),
            unit_price_tax_excl: Set(round(line.unit_price_tax_excl, precision, mode)),
            total_tax_incl: Set(round(
                with_tax(line.unit_price_tax_excl * quantity, line.tax_rate),
                precision,
                mode,
            )),
            total_tax_excl: Set(round(line.unit_price_tax_excl * quantity, precision, mode)),
            tax_rate: Set(line.tax_rate),
            quantity_in_stock: Set(line.quantity_in_stock),
            customization: Set(line.customization.clone()),
        };
        let detail = detail.insert(conn).await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "order detail creation failed");
            CheckoutError::OrderPersistence(e.to_string())
        })?;
        details.push(detail);
    }

    if let Some(carrier_id) = carrier_id {
        let weight = package
            .lines
            .iter()
            .fold(Decimal::ZERO, |acc, l| acc + l.weight * Decimal::from(l.quantity));
        order_carrier::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            carrier_id: Set(carrier_id),
            weight: Set(weight),
            shipping_cost_tax_incl: Set(totals.shipping.tax_incl),
            shipping_cost_tax_excl: Set(totals.shipping.tax_excl),
        }
        .insert(conn)
        .await
        .map_err(|e| {
            error!(order_id = %order.id, error = %e, "order carrier creation failed");
            CheckoutError::OrderPersistence(e.to_string())
        })?;
    }

    Ok(MaterializedOrder {
        order,
        details,
        breakdown,
        downgraded,
    })
}
