use uuid::Uuid;

/// Closed set of failure kinds for the checkout workflow.
///
/// Guard and persistence failures abort the whole validation with no partial
/// writes (the orchestrator runs inside one database transaction). A paid
/// amount that disagrees with the computed cart total is deliberately *not*
/// an error: the order is downgraded to the configured payment-error state
/// so back-office operators can reconcile it by hand.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("order state {0} cannot be loaded")]
    OrderStateNotFound(Uuid),

    #[error("payment module '{0}' is not active")]
    ModuleInactive(String),

    #[error("cart {0} cannot be loaded or an order has already been placed using it")]
    CartAlreadyConverted(Uuid),

    #[error("secure key does not match for cart {0}")]
    SecureKeyMismatch(Uuid),

    #[error("the order address country '{0}' is not active")]
    InactiveCountry(String),

    #[error("cannot save order: {0}")]
    OrderPersistence(String),

    #[error("cannot save order payment: {0}")]
    PaymentPersistence(String),

    #[error("hook listener failed at '{stage}': {message}")]
    Hook { stage: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl CheckoutError {
    /// Stable machine-readable reason code, one per variant.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::OrderStateNotFound(_) => "order_state_not_found",
            Self::ModuleInactive(_) => "module_inactive",
            Self::CartAlreadyConverted(_) => "cart_already_converted",
            Self::SecureKeyMismatch(_) => "secure_key_mismatch",
            Self::InactiveCountry(_) => "inactive_country",
            Self::OrderPersistence(_) => "order_persistence",
            Self::PaymentPersistence(_) => "payment_persistence",
            Self::Hook { .. } => "hook_listener",
            Self::NotFound(_) => "not_found",
            Self::Database(_) => "database",
        }
    }
}
