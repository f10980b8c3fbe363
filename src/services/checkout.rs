use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{CheckoutSettings, PaymentModuleInfo};
use crate::entities::{
    address, carrier, cart, cart_coupon, cart_item, cart_rule, country, currency, customer, order,
    order_detail, order_note, order_state, CartStatus,
};
use crate::errors::CheckoutError;
use crate::events::{Event, EventSender};
use crate::hooks::{HookPayload, HookRegistry, HookStage};
use crate::money::round;
use crate::services::cart_rules::{apply_cart_rules, AppliedRuleLine};
use crate::services::delivery::{resolve_delivery_options, AddressShipping};
use crate::services::materialization::{
    materialize_order, price_package, OrderDraft, PackagePlan,
};
use crate::services::notifications::{
    build_order_confirmation, build_voucher_mail, should_send_confirmation, ConfirmationInputs,
    InvoiceRenderer, LoggingMailService, MailService, PlainTextInvoiceRenderer,
};
use crate::services::pricing::{DefaultPricingCalculator, PricingCalculator};
use crate::services::reconciliation::{reconcile_cart_rules, RuleUsageCache};
use crate::services::settlement::{
    append_history, apply_backorder_cascade, mark_cart_converted, record_payment,
};
use crate::services::stock::{LoggingStockSynchronizer, StockSynchronizer};

/// Gateway-facing request to turn a cart into orders.
#[derive(Debug, Clone)]
pub struct ValidateOrderRequest {
    pub cart_id: Uuid,
    /// State the orders should land in, typically "payment accepted".
    pub target_state_id: Uuid,
    /// Amount the gateway reports as captured, in the cart currency.
    pub amount_paid: Decimal,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    /// Externally supplied order reference; generated when absent.
    pub reference: Option<String>,
    /// Caller-supplied proof of cart ownership; `None` skips the check.
    pub secure_key: Option<String>,
    /// Customer message captured on the payment page.
    pub message: Option<String>,
}

/// Result of a successful validation: every order shares `reference`.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub reference: String,
    pub orders: Vec<order::Model>,
    pub issued_vouchers: Vec<cart_rule::Model>,
    /// Whether the paid-amount check parked the orders in the payment-error
    /// state instead of the requested one.
    pub downgraded: bool,
}

/// Everything read once at the start of a validation call. All pricing and
/// materialization work off this snapshot; nothing re-reads reference data
/// mid-flight.
pub struct CheckoutContext {
    pub cart: cart::Model,
    pub customer: Option<customer::Model>,
    pub items: Vec<cart_item::Model>,
    /// Attached vouchers, in attachment order, already reconciled.
    pub rules: Vec<cart_rule::Model>,
    pub addresses: HashMap<Uuid, address::Model>,
    pub countries: HashMap<String, country::Model>,
    /// Active carriers in display order.
    pub carriers: Vec<carrier::Model>,
    pub rates: HashMap<String, Decimal>,
    pub conversion_rate: Decimal,
    pub rule_cache: RuleUsageCache,
}

impl CheckoutContext {
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        cart: cart::Model,
    ) -> Result<Self, CheckoutError> {
        let customer = match cart.customer_id {
            Some(id) => customer::Entity::find_by_id(id).one(conn).await?,
            None => None,
        };
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::Id)
            .all(conn)
            .await?;

        let coupons = cart_coupon::Entity::find()
            .filter(cart_coupon::Column::CartId.eq(cart.id))
            .order_by_asc(cart_coupon::Column::AppliedAt)
            .all(conn)
            .await?;
        let mut rules = Vec::with_capacity(coupons.len());
        for coupon in &coupons {
            match cart_rule::Entity::find_by_id(coupon.cart_rule_id).one(conn).await? {
                Some(rule) => rules.push(rule),
                None => warn!(
                    cart_id = %cart.id,
                    cart_rule_id = %coupon.cart_rule_id,
                    "cart references a missing cart rule, skipping"
                ),
            }
        }

        let mut address_ids: Vec<Uuid> = items.iter().map(|i| i.delivery_address_id).collect();
        address_ids.push(cart.invoice_address_id);
        address_ids.sort_unstable();
        address_ids.dedup();
        let addresses = address::Entity::find()
            .filter(address::Column::Id.is_in(address_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let countries = country::Entity::find()
            .all(conn)
            .await?
            .into_iter()
            .map(|c| (c.code.clone(), c))
            .collect();
        let carriers = carrier::Entity::find()
            .filter(carrier::Column::Active.eq(true))
            .order_by_asc(carrier::Column::Position)
            .all(conn)
            .await?;
        let rates: HashMap<String, Decimal> = currency::Entity::find()
            .all(conn)
            .await?
            .into_iter()
            .map(|c| (c.code, c.conversion_rate))
            .collect();
        let conversion_rate = rates.get(&cart.currency).copied().unwrap_or(Decimal::ONE);

        Ok(Self {
            cart,
            customer,
            items,
            rules,
            addresses,
            countries,
            carriers,
            rates,
            conversion_rate,
            rule_cache: RuleUsageCache::new(),
        })
    }
}

/// Generates a 9-letter order reference.
pub fn generate_reference<R: Rng + ?Sized>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Draws references until one is unused. Collisions are vanishingly rare but
/// the reference is customer-facing, so uniqueness is checked.
async fn unique_reference<C: ConnectionTrait>(conn: &C) -> Result<String, CheckoutError> {
    loop {
        let candidate = generate_reference(&mut rand::thread_rng());
        let taken = order::Entity::find()
            .filter(order::Column::Reference.eq(candidate.clone()))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
}

/// Groups cart lines into one package per delivery address, preserving the
/// cart's line order.
pub fn build_packages(
    items: &[cart_item::Model],
    resolved_carriers: &HashMap<Uuid, Option<Uuid>>,
) -> Vec<PackagePlan> {
    let mut packages: Vec<PackagePlan> = Vec::new();
    for item in items {
        match packages
            .iter_mut()
            .find(|p| p.address_id == item.delivery_address_id)
        {
            Some(package) => package.lines.push(item.clone()),
            None => packages.push(PackagePlan {
                address_id: item.delivery_address_id,
                carrier_id: resolved_carriers
                    .get(&item.delivery_address_id)
                    .copied()
                    .flatten(),
                lines: vec![item.clone()],
            }),
        }
    }
    packages
}

struct SettledOrder {
    order: order::Model,
    details: Vec<order_detail::Model>,
    applied_rules: Vec<AppliedRuleLine>,
    issued_vouchers: Vec<cart_rule::Model>,
    final_state: order_state::Model,
    downgraded: bool,
}

/// The order-validation workflow.
///
/// One call converts one cart into one order per delivery address, inside a
/// single database transaction; notifications and stock synchronization run
/// after the commit and can no longer undo it.
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    settings: CheckoutSettings,
    module: PaymentModuleInfo,
    pricing: Arc<dyn PricingCalculator>,
    mail: Arc<dyn MailService>,
    stock: Arc<dyn StockSynchronizer>,
    invoice_renderer: Arc<dyn InvoiceRenderer>,
    hooks: Arc<HookRegistry>,
    events: EventSender,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: CheckoutSettings,
        module: PaymentModuleInfo,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            settings,
            module,
            pricing: Arc::new(DefaultPricingCalculator),
            mail: Arc::new(LoggingMailService),
            stock: Arc::new(LoggingStockSynchronizer),
            invoice_renderer: Arc::new(PlainTextInvoiceRenderer),
            hooks: Arc::new(HookRegistry::new()),
            events,
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingCalculator>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailService>) -> Self {
        self.mail = mail;
        self
    }

    pub fn with_stock(mut self, stock: Arc<dyn StockSynchronizer>) -> Self {
        self.stock = stock;
        self
    }

    pub fn with_invoice_renderer(mut self, renderer: Arc<dyn InvoiceRenderer>) -> Self {
        self.invoice_renderer = renderer;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Validates a payment against a cart and materializes the orders.
    ///
    /// Guard failures and persistence failures roll the whole call back; a
    /// paid amount that does not reconcile is not a failure and instead
    /// parks the orders in the payment-error state.
    #[instrument(skip(self, request), fields(cart_id = %request.cart_id, method = %request.payment_method))]
    pub async fn validate_order(
        &self,
        request: ValidateOrderRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if !self.module.active {
            return Err(CheckoutError::ModuleInactive(self.module.name.clone()));
        }

        let txn = self.db.begin().await?;

        let mut target_state = order_state::Entity::find_by_id(request.target_state_id)
            .one(&txn)
            .await?
            .ok_or(CheckoutError::OrderStateNotFound(request.target_state_id))?;

        let cart = cart::Entity::find_by_id(request.cart_id)
            .one(&txn)
            .await?
            .ok_or(CheckoutError::CartAlreadyConverted(request.cart_id))?;
        if cart.status == CartStatus::Converted {
            return Err(CheckoutError::CartAlreadyConverted(cart.id));
        }
        if let Some(key) = &request.secure_key {
            if *key != cart.secure_key {
                return Err(CheckoutError::SecureKeyMismatch(cart.id));
            }
        }

        let mut payload =
            HookPayload::new(cart.id, target_state.id, request.payment_method.clone());
        self.hooks.dispatch(HookStage::BeforeValidate, &mut payload)?;
        if payload.target_state_id != target_state.id {
            target_state = order_state::Entity::find_by_id(payload.target_state_id)
                .one(&txn)
                .await?
                .ok_or(CheckoutError::OrderStateNotFound(payload.target_state_id))?;
        }

        let mut ctx = CheckoutContext::load(&txn, cart).await?;
        if ctx.items.is_empty() {
            return Err(CheckoutError::CartAlreadyConverted(ctx.cart.id));
        }

        // Delivery resolution: keep valid stored choices, back-fill the rest.
        let selected: HashMap<Uuid, Uuid> = ctx
            .cart
            .delivery_option
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let shipping_needs: Vec<AddressShipping> = {
            let mut seen = Vec::new();
            for item in &ctx.items {
                match seen
                    .iter_mut()
                    .find(|s: &&mut AddressShipping| s.address_id == item.delivery_address_id)
                {
                    Some(entry) => entry.needs_shipping |= !item.is_virtual,
                    None => seen.push(AddressShipping {
                        address_id: item.delivery_address_id,
                        needs_shipping: !item.is_virtual,
                    }),
                }
            }
            seen
        };
        let resolved = resolve_delivery_options(&shipping_needs, &selected, &ctx.carriers);
        let packages = build_packages(&ctx.items, &resolved);

        // Voucher reconciliation against the whole cart's products total.
        let cart_products = {
            let whole_cart = PackagePlan {
                address_id: ctx.cart.invoice_address_id,
                carrier_id: None,
                lines: ctx.items.clone(),
            };
            let mut no_rules = std::mem::take(&mut ctx.rules);
            let totals =
                price_package(&self.settings, self.pricing.as_ref(), &ctx, &whole_cart)?
                    .breakdown
                    .totals;
            std::mem::swap(&mut ctx.rules, &mut no_rules);
            totals.products
        };
        reconcile_cart_rules(
            &txn,
            &ctx.cart,
            cart_products,
            &mut ctx.rules,
            &mut ctx.rule_cache,
            Utc::now(),
        )
        .await?;

        let reference = match &request.reference {
            Some(reference) => reference.clone(),
            None => unique_reference(&txn).await?,
        };

        // The reconciliation target: the payable total over every package.
        let mut cart_total_paid = Decimal::ZERO;
        for package in &packages {
            cart_total_paid +=
                price_package(&self.settings, self.pricing.as_ref(), &ctx, package)?
                    .breakdown
                    .totals
                    .paid
                    .tax_incl;
        }
        cart_total_paid = round(
            cart_total_paid,
            self.settings.precision,
            self.settings.rounding_mode,
        );

        ctx.rule_cache.clear();
        let mut consumed: HashSet<Uuid> = HashSet::new();
        let mut settled: Vec<SettledOrder> = Vec::new();
        let mut error_state: Option<order_state::Model> = None;

        for package in &packages {
            let draft = OrderDraft {
                reference: &reference,
                payment_method: &request.payment_method,
                module_name: &self.module.name,
                target_state: &target_state,
                amount_paid: request.amount_paid,
                cart_total_paid,
            };
            let materialized = materialize_order(
                &txn,
                &self.settings,
                self.pricing.as_ref(),
                &ctx,
                package,
                &draft,
            )
            .await?;

            let state = if materialized.downgraded {
                match &error_state {
                    Some(state) => state.clone(),
                    None => {
                        let state = order_state::Entity::find_by_id(self.settings.error_state_id)
                            .one(&txn)
                            .await?
                            .ok_or(CheckoutError::OrderStateNotFound(
                                self.settings.error_state_id,
                            ))?;
                        error_state = Some(state.clone());
                        state
                    }
                }
            } else {
                target_state.clone()
            };

            let rule_outcome = apply_cart_rules(
                &txn,
                &self.settings,
                &ctx,
                &materialized.order,
                &materialized.breakdown,
                packages.len(),
                &mut consumed,
            )
            .await?;

            append_history(&txn, materialized.order.id, materialized.order.current_state_id)
                .await?;
            let cascaded = apply_backorder_cascade(
                &txn,
                &self.settings,
                &materialized.order,
                &materialized.details,
                &state,
            )
            .await?;

            let mut final_order = materialized.order.clone();
            if let Some(state_id) = cascaded {
                final_order.current_state_id = state_id;
            }

            payload.order_ids = vec![final_order.id];
            self.hooks.dispatch(HookStage::OrderValidated, &mut payload)?;

            settled.push(SettledOrder {
                order: final_order,
                details: materialized.details,
                applied_rules: rule_outcome.lines,
                issued_vouchers: rule_outcome.issued,
                final_state: state,
                downgraded: materialized.downgraded,
            });
        }

        // One payment per call, bound to the shared reference, and only when
        // the orders landed in a logable state: an error-state call makes no
        // accounting claim.
        if !request.amount_paid.is_zero() {
            if let Some(first) = settled.first_mut().filter(|s| s.final_state.logable) {
                record_payment(
                    &txn,
                    &first.order,
                    request.amount_paid,
                    &request.payment_method,
                    request.transaction_id.clone(),
                )
                .await?;
                first.order.total_paid_real += request.amount_paid;
            }
        }

        self.attach_notes(&txn, &ctx, &request, settled.first().map(|s| s.order.id))
            .await?;
        mark_cart_converted(&txn, &ctx.cart).await?;

        payload.order_ids = settled.iter().map(|s| s.order.id).collect();
        self.hooks.dispatch(HookStage::AfterValidate, &mut payload)?;

        txn.commit().await?;
        info!(
            cart_id = %ctx.cart.id,
            reference = %reference,
            orders = settled.len(),
            "cart validated into orders"
        );

        self.notify(&ctx, &mut payload, &settled).await;

        let downgraded = settled.iter().any(|s| s.downgraded);
        let outcome = CheckoutOutcome {
            reference: reference.clone(),
            orders: settled.iter().map(|s| s.order.clone()).collect(),
            issued_vouchers: settled
                .into_iter()
                .flat_map(|s| s.issued_vouchers)
                .collect(),
            downgraded,
        };
        self.events
            .send(Event::CheckoutCompleted {
                cart_id: ctx.cart.id,
                reference,
                order_ids: outcome.orders.iter().map(|o| o.id).collect(),
            })
            .await;
        Ok(outcome)
    }

    /// Saves the payment-page message as a private note and promotes the
    /// cart's pre-existing notes onto the first order.
    async fn attach_notes<C: ConnectionTrait>(
        &self,
        conn: &C,
        ctx: &CheckoutContext,
        request: &ValidateOrderRequest,
        first_order_id: Option<Uuid>,
    ) -> Result<(), CheckoutError> {
        if let Some(body) = request.message.as_deref().filter(|m| !m.trim().is_empty()) {
            let mut body = body.trim().to_string();
            if request.secure_key.is_none() {
                body.push_str("\nWarning: the secure key was not verified for this message.");
            }
            order_note::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(ctx.cart.id),
                order_id: Set(first_order_id),
                customer_id: Set(ctx.cart.customer_id),
                body: Set(body),
                private: Set(true),
                created_at: Set(Utc::now()),
            }
            .insert(conn)
            .await?;
        }

        if let Some(order_id) = first_order_id {
            let orphans = order_note::Entity::find()
                .filter(order_note::Column::CartId.eq(ctx.cart.id))
                .filter(order_note::Column::OrderId.is_null())
                .all(conn)
                .await?;
            for note in orphans {
                let mut active: order_note::ActiveModel = note.into();
                active.order_id = Set(Some(order_id));
                active.update(conn).await?;
            }
        }
        Ok(())
    }

    /// Post-commit side effects: confirmation and voucher emails, stock
    /// synchronization, events. Failures here are logged, never surfaced.
    async fn notify(
        &self,
        ctx: &CheckoutContext,
        payload: &mut HookPayload,
        settled: &[SettledOrder],
    ) {
        for entry in settled {
            self.events.send(Event::OrderCreated(entry.order.id)).await;
            self.events
                .send(Event::OrderStateChanged {
                    order_id: entry.order.id,
                    state_id: entry.order.current_state_id,
                })
                .await;

            if self.settings.stock_management {
                if let Err(e) = self
                    .stock
                    .reconcile(
                        entry.order.id,
                        self.settings.error_state_id,
                        self.settings.canceled_state_id,
                    )
                    .await
                {
                    warn!(order_id = %entry.order.id, error = %e, "stock synchronization failed");
                }
            }

            if !should_send_confirmation(
                &self.settings,
                &entry.order,
                &entry.final_state,
                ctx.customer.as_ref(),
            ) {
                continue;
            }
            let Some(customer) = ctx.customer.as_ref() else {
                continue;
            };

            let country_name = |address: Option<&address::Model>| {
                address
                    .and_then(|a| ctx.countries.get(&a.country_code))
                    .map(|c| c.name.as_str())
            };
            let delivery_address = ctx.addresses.get(&entry.order.delivery_address_id);
            let invoice_address = ctx.addresses.get(&entry.order.invoice_address_id);
            let carrier_name = entry
                .order
                .carrier_id
                .and_then(|id| ctx.carriers.iter().find(|c| c.id == id))
                .map(|c| c.name.as_str());

            let mut message = build_order_confirmation(
                &self.settings,
                &entry.order,
                &entry.details,
                &ConfirmationInputs {
                    customer,
                    delivery_address,
                    invoice_address,
                    delivery_country_name: country_name(delivery_address),
                    invoice_country_name: country_name(invoice_address),
                    carrier_name,
                    applied_rules: &entry.applied_rules,
                },
            );

            if self.settings.invoice_enabled && entry.final_state.invoice {
                payload.order_ids = vec![entry.order.id];
                if let Err(e) = self.hooks.dispatch(HookStage::InvoiceRender, payload) {
                    warn!(order_id = %entry.order.id, error = %e, "invoice hook failed, sending without attachment");
                } else {
                    match self
                        .invoice_renderer
                        .render(&entry.order, &entry.details)
                        .await
                    {
                        Ok(attachment) => message.attachment = Some(attachment),
                        Err(e) => warn!(
                            order_id = %entry.order.id,
                            error = %e,
                            "invoice rendering failed, sending without attachment"
                        ),
                    }
                }
            }

            if let Err(e) = self.mail.send(message).await {
                warn!(order_id = %entry.order.id, error = %e, "confirmation email delivery failed");
            }

            for voucher in &entry.issued_vouchers {
                self.events
                    .send(Event::VoucherIssued {
                        cart_rule_id: voucher.id,
                        code: voucher.code.clone(),
                    })
                    .await;
                let mail =
                    build_voucher_mail(&self.settings, voucher, &entry.order, customer);
                if let Err(e) = self.mail.send(mail).await {
                    warn!(order_id = %entry.order.id, error = %e, "voucher email delivery failed");
                }
            }
        }
    }
}
