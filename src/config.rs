use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::RoundingMode;

/// Which of the order's two addresses determines the tax jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaxAddressType {
    Delivery,
    Invoice,
}

/// Whether customer-facing totals are presented tax-included or tax-excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaxDisplay {
    TaxIncluded,
    TaxExcluded,
}

/// Shop-wide checkout configuration.
///
/// Everything the workflow reads at call time is injected through this value:
/// monetary precision and rounding mode, the tax-address policy, the reserved
/// order-state ids, and the stock/backorder/invoice switches. Nothing is
/// looked up from ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSettings {
    /// Number of decimal places all monetary totals are rounded to.
    pub precision: u32,
    /// Midpoint strategy used for every monetary rounding step.
    pub rounding_mode: RoundingMode,
    pub tax_address_type: TaxAddressType,
    pub tax_display: TaxDisplay,
    /// Master switch for stock bookkeeping.
    pub stock_management: bool,
    /// When enabled together with `stock_management`, orders containing
    /// backordered lines receive a secondary state transition.
    pub backorder_status_enabled: bool,
    /// Gates the invoice attachment on confirmation emails.
    pub invoice_enabled: bool,
    /// State an order is forced into when the paid amount does not reconcile.
    pub error_state_id: Uuid,
    pub canceled_state_id: Uuid,
    pub backorder_paid_state_id: Uuid,
    pub backorder_unpaid_state_id: Uuid,
    /// Currency amount vouchers are converted into when they carry another one.
    pub default_currency: String,
    /// Flat gift-wrapping fee, tax excluded.
    pub wrapping_fee: Decimal,
    pub locale: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            precision: 2,
            rounding_mode: RoundingMode::HalfUp,
            tax_address_type: TaxAddressType::Delivery,
            tax_display: TaxDisplay::TaxIncluded,
            stock_management: true,
            backorder_status_enabled: false,
            invoice_enabled: false,
            error_state_id: Uuid::nil(),
            canceled_state_id: Uuid::nil(),
            backorder_paid_state_id: Uuid::nil(),
            backorder_unpaid_state_id: Uuid::nil(),
            default_currency: "EUR".to_string(),
            wrapping_fee: Decimal::ZERO,
            locale: "en-US".to_string(),
        }
    }
}

impl CheckoutSettings {
    /// Loads settings from the environment (`CHECKOUT_*` variables) on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&CheckoutSettings::default())?;
        config::Config::builder()
            .add_source(defaults)
            .add_source(config::Environment::with_prefix("CHECKOUT"))
            .build()?
            .try_deserialize()
    }
}

/// Identity of the payment module performing the validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentModuleInfo {
    pub name: String,
    pub active: bool,
}

impl PaymentModuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }
}
