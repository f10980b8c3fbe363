use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::errors::CheckoutError;

/// Named extension points of the validation pipeline, fired in this order:
/// `BeforeValidate`, then per order `OrderValidated` (and `InvoiceRender`
/// when an invoice attachment is produced), then `AfterValidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum HookStage {
    BeforeValidate,
    AfterValidate,
    OrderValidated,
    InvoiceRender,
}

/// Mutable payload bag handed to hook listeners.
///
/// Listeners rewrite it in place before the workflow continues; rewriting
/// `target_state_id` from a `before-validate` listener changes the state the
/// orders are placed into.
#[derive(Debug, Clone)]
pub struct HookPayload {
    pub cart_id: Uuid,
    pub target_state_id: Uuid,
    pub payment_method: String,
    /// Order ids known at this stage: empty before materialization, the
    /// single subject order for `order-validated`, all siblings afterwards.
    pub order_ids: Vec<Uuid>,
    pub extra: Map<String, Value>,
}

impl HookPayload {
    pub fn new(cart_id: Uuid, target_state_id: Uuid, payment_method: impl Into<String>) -> Self {
        Self {
            cart_id,
            target_state_id,
            payment_method: payment_method.into(),
            order_ids: Vec::new(),
            extra: Map::new(),
        }
    }
}

type Listener = Box<dyn Fn(&mut HookPayload) -> Result<(), String> + Send + Sync>;

/// Ordered listener lists per stage. This is the workflow's sole
/// extensibility mechanism.
#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<HashMap<HookStage, Vec<Listener>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, stage: HookStage, listener: F)
    where
        F: Fn(&mut HookPayload) -> Result<(), String> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .expect("hook registry lock poisoned")
            .entry(stage)
            .or_default()
            .push(Box::new(listener));
    }

    /// Runs every listener registered for `stage` against the payload.
    ///
    /// Business-hook failures propagate; `invoice-render` failures only cost
    /// the attachment, so they are logged and swallowed by the caller.
    pub fn dispatch(&self, stage: HookStage, payload: &mut HookPayload) -> Result<(), CheckoutError> {
        let listeners = self.listeners.read().expect("hook registry lock poisoned");
        let Some(stage_listeners) = listeners.get(&stage) else {
            return Ok(());
        };
        for listener in stage_listeners {
            listener(payload).map_err(|message| {
                warn!(stage = %stage, %message, "hook listener failed");
                CheckoutError::Hook {
                    stage: stage.to_string(),
                    message,
                }
            })?;
        }
        Ok(())
    }
}
