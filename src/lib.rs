//! Order validation and payment settlement for a storefront checkout.
//!
//! The entry point is [`services::CheckoutService::validate_order`]: given a
//! cart and a captured payment it materializes one order per delivery
//! address, applies and splits vouchers, records the payment and state
//! history, and fires notifications once everything is committed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use storefront_checkout::config::{CheckoutSettings, PaymentModuleInfo};
//! use storefront_checkout::events::EventSender;
//! use storefront_checkout::services::{CheckoutService, ValidateOrderRequest};
//!
//! # async fn run(db: sea_orm::DatabaseConnection) -> Result<(), storefront_checkout::errors::CheckoutError> {
//! let settings = CheckoutSettings::from_env().expect("settings");
//! let (events, _rx) = EventSender::channel(64);
//! let service = CheckoutService::new(
//!     Arc::new(db),
//!     settings,
//!     PaymentModuleInfo::new("wirepayment"),
//!     events,
//! );
//! let outcome = service
//!     .validate_order(ValidateOrderRequest {
//!         cart_id: uuid::Uuid::new_v4(),
//!         target_state_id: uuid::Uuid::new_v4(),
//!         amount_paid: rust_decimal::Decimal::new(4999, 2),
//!         payment_method: "Bank wire".into(),
//!         transaction_id: None,
//!         reference: None,
//!         secure_key: None,
//!         message: None,
//!     })
//!     .await?;
//! println!("placed under reference {}", outcome.reference);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entities;
pub mod errors;
pub mod events;
pub mod hooks;
pub mod money;
pub mod services;

pub use config::CheckoutSettings;
pub use errors::CheckoutError;
pub use services::{CheckoutOutcome, CheckoutService, ValidateOrderRequest};
