use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::{CheckoutSettings, TaxDisplay};
use crate::entities::{address, cart_rule, customer, order, order_detail, order_state};
use crate::errors::CheckoutError;
use crate::money::format_amount;
use crate::services::cart_rules::AppliedRuleLine;

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub mime: String,
    pub content: Vec<u8>,
}

/// A templated outbound email. Template variables are kept sorted so message
/// payloads render deterministically.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub to_name: String,
    pub template: String,
    pub subject: String,
    pub variables: BTreeMap<String, String>,
    pub attachment: Option<MailAttachment>,
}

/// Outbound email delivery. Implementations are called after the checkout
/// transaction commits; a delivery failure can no longer undo the order.
#[async_trait]
pub trait MailService: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), CheckoutError>;
}

/// Default delivery that only logs the message. Useful in development and as
/// the harmless fallback when no transport is wired.
#[derive(Debug, Clone, Default)]
pub struct LoggingMailService;

#[async_trait]
impl MailService for LoggingMailService {
    async fn send(&self, message: MailMessage) -> Result<(), CheckoutError> {
        info!(
            to = %message.to,
            template = %message.template,
            subject = %message.subject,
            "mail delivery (logging transport)"
        );
        Ok(())
    }
}

/// Renders the invoice attachment for a confirmation email.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(
        &self,
        order: &order::Model,
        details: &[order_detail::Model],
    ) -> Result<MailAttachment, CheckoutError>;
}

/// Plain-text invoice rendering.
#[derive(Debug, Clone, Default)]
pub struct PlainTextInvoiceRenderer;

#[async_trait]
impl InvoiceRenderer for PlainTextInvoiceRenderer {
    async fn render(
        &self,
        order: &order::Model,
        details: &[order_detail::Model],
    ) -> Result<MailAttachment, CheckoutError> {
        let mut body = format!("Invoice for order {}\n\n", order.reference);
        for detail in details {
            body.push_str(&format!(
                "{} x{} {} {}\n",
                detail.name, detail.quantity, detail.total_tax_incl, order.currency
            ));
        }
        body.push_str(&format!(
            "\nTotal {} {}\n",
            order.total_paid_tax_incl, order.currency
        ));
        Ok(MailAttachment {
            filename: format!("invoice-{}.txt", order.reference),
            mime: "text/plain".to_string(),
            content: body.into_bytes(),
        })
    }
}

/// Renders an address block, skipping the parts that are absent. A missing
/// address degrades to an empty block, never a failed email.
pub fn format_address(address: Option<&address::Model>, country_name: Option<&str>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    let mut lines = vec![format!("{} {}", address.first_name, address.last_name)];
    if let Some(company) = address.company.as_deref().filter(|c| !c.is_empty()) {
        lines.push(company.to_string());
    }
    lines.push(address.line1.clone());
    if let Some(line2) = address.line2.as_deref().filter(|l| !l.is_empty()) {
        lines.push(line2.to_string());
    }
    let mut locality = format!("{} {}", address.postal_code, address.city);
    if let Some(province) = address.province.as_deref().filter(|p| !p.is_empty()) {
        locality.push_str(&format!(", {province}"));
    }
    lines.push(locality);
    lines.push(country_name.unwrap_or(&address.country_code).to_string());
    if let Some(phone) = address.phone.as_deref().filter(|p| !p.is_empty()) {
        lines.push(phone.to_string());
    }
    lines.join("\n")
}

fn money(settings: &CheckoutSettings, value: rust_decimal::Decimal, currency: &str) -> String {
    format!(
        "{} {}",
        format_amount(value, settings.precision, settings.rounding_mode),
        currency
    )
}

/// Everything the confirmation template needs beyond the order itself.
pub struct ConfirmationInputs<'a> {
    pub customer: &'a customer::Model,
    pub delivery_address: Option<&'a address::Model>,
    pub invoice_address: Option<&'a address::Model>,
    pub delivery_country_name: Option<&'a str>,
    pub invoice_country_name: Option<&'a str>,
    pub carrier_name: Option<&'a str>,
    pub applied_rules: &'a [AppliedRuleLine],
}

/// Assembles the order-confirmation email for one order.
///
/// Totals are presented in the shop's configured tax display; one email is
/// produced per order, so a multi-address cart confirms each package
/// separately under the shared reference.
pub fn build_order_confirmation(
    settings: &CheckoutSettings,
    order: &order::Model,
    details: &[order_detail::Model],
    inputs: &ConfirmationInputs<'_>,
) -> MailMessage {
    let tax_incl = settings.tax_display == TaxDisplay::TaxIncluded;
    let pick = |incl: rust_decimal::Decimal, excl: rust_decimal::Decimal| {
        if tax_incl {
            incl
        } else {
            excl
        }
    };

    let products = details
        .iter()
        .map(|d| {
            let mut line = format!(
                "{} (x{}): {}",
                d.name,
                d.quantity,
                money(
                    settings,
                    pick(d.total_tax_incl, d.total_tax_excl),
                    &order.currency
                )
            );
            if let Some(customization) = d.customization.as_deref().filter(|c| !c.is_empty()) {
                line.push_str(&format!(" [{customization}]"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");
    let discounts = inputs
        .applied_rules
        .iter()
        .map(|r| {
            format!(
                "{}: -{}",
                r.name,
                money(
                    settings,
                    pick(r.value.tax_incl, r.value.tax_excl),
                    &order.currency
                )
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut variables = BTreeMap::new();
    variables.insert("firstname".into(), inputs.customer.first_name.clone());
    variables.insert("lastname".into(), inputs.customer.last_name.clone());
    variables.insert("email".into(), inputs.customer.email.clone());
    variables.insert("order_name".into(), order.reference.clone());
    variables.insert("date".into(), order.created_at.format("%Y-%m-%d").to_string());
    variables.insert("payment".into(), order.payment_method.clone());
    variables.insert(
        "carrier".into(),
        inputs.carrier_name.unwrap_or("-").to_string(),
    );
    variables.insert(
        "delivery_block".into(),
        format_address(inputs.delivery_address, inputs.delivery_country_name),
    );
    variables.insert(
        "invoice_block".into(),
        format_address(inputs.invoice_address, inputs.invoice_country_name),
    );
    variables.insert("products".into(), products);
    variables.insert("discounts".into(), discounts);
    variables.insert(
        "total_products".into(),
        money(
            settings,
            pick(order.total_products_tax_incl, order.total_products_tax_excl),
            &order.currency,
        ),
    );
    variables.insert(
        "total_discounts".into(),
        money(
            settings,
            pick(order.total_discounts_tax_incl, order.total_discounts_tax_excl),
            &order.currency,
        ),
    );
    variables.insert(
        "total_shipping".into(),
        money(
            settings,
            pick(order.total_shipping_tax_incl, order.total_shipping_tax_excl),
            &order.currency,
        ),
    );
    variables.insert(
        "total_wrapping".into(),
        money(
            settings,
            pick(order.total_wrapping_tax_incl, order.total_wrapping_tax_excl),
            &order.currency,
        ),
    );
    variables.insert(
        "total_paid".into(),
        money(settings, order.total_paid_tax_incl, &order.currency),
    );

    MailMessage {
        to: inputs.customer.email.clone(),
        to_name: inputs.customer.full_name(),
        template: "order_conf".to_string(),
        subject: format!("Order confirmation {}", order.reference),
        variables,
        attachment: None,
    }
}

/// Assembles the email telling the customer about their remainder voucher.
pub fn build_voucher_mail(
    settings: &CheckoutSettings,
    voucher: &cart_rule::Model,
    order: &order::Model,
    customer: &customer::Model,
) -> MailMessage {
    let mut variables = BTreeMap::new();
    variables.insert("firstname".into(), customer.first_name.clone());
    variables.insert("lastname".into(), customer.last_name.clone());
    variables.insert("order_name".into(), order.reference.clone());
    variables.insert("voucher_code".into(), voucher.code.clone());
    variables.insert(
        "voucher_amount".into(),
        money(settings, voucher.reduction_amount, &voucher.reduction_currency),
    );
    MailMessage {
        to: customer.email.clone(),
        to_name: customer.full_name(),
        template: "voucher".to_string(),
        subject: format!("New voucher for your order {}", order.reference),
        variables,
        attachment: None,
    }
}

/// Whether a confirmation email goes out for this order: never for orders
/// parked in the payment-error or canceled state, never from a state flagged
/// silent, and only to a deliverable address.
pub fn should_send_confirmation(
    settings: &CheckoutSettings,
    order: &order::Model,
    state: &order_state::Model,
    customer: Option<&customer::Model>,
) -> bool {
    if !state.send_email {
        return false;
    }
    if order.current_state_id == settings.error_state_id
        || order.current_state_id == settings.canceled_state_id
    {
        return false;
    }
    customer
        .map(|c| validator::validate_email(&c.email))
        .unwrap_or(false)
}
