//! The validation pipeline, one module per stage: pure pricing and delivery
//! resolution feed voucher reconciliation, order materialization, cart-rule
//! application and settlement, all orchestrated by [`checkout`].

pub mod cart_rules;
pub mod checkout;
pub mod delivery;
pub mod materialization;
pub mod notifications;
pub mod pricing;
pub mod reconciliation;
pub mod settlement;
pub mod stock;

pub use cart_rules::{derive_remainder_code, AppliedRuleLine};
pub use checkout::{
    generate_reference, CheckoutContext, CheckoutOutcome, CheckoutService, ValidateOrderRequest,
};
pub use delivery::{resolve_delivery_options, AddressShipping};
pub use materialization::{MaterializedOrder, OrderDraft, PackagePlan};
pub use notifications::{
    InvoiceRenderer, LoggingMailService, MailAttachment, MailMessage, MailService,
    PlainTextInvoiceRenderer,
};
pub use pricing::{DefaultPricingCalculator, PricingBreakdown, PricingCalculator, PricingScope};
pub use reconciliation::RuleUsageCache;
pub use stock::{LoggingStockSynchronizer, StockSynchronizer};
