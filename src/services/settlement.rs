use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::CheckoutSettings;
use crate::entities::{cart, order, order_detail, order_history, order_payment, order_state, CartStatus};
use crate::errors::CheckoutError;

/// Records the captured payment against the reference shared by the cart's
/// sibling orders, and rolls the amount into the carrying order's
/// `total_paid_real`.
pub async fn record_payment<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    amount: Decimal,
    payment_method: &str,
    transaction_id: Option<String>,
) -> Result<order_payment::Model, CheckoutError> {
    let payment = order_payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_reference: Set(order.reference.clone()),
        order_id: Set(order.id),
        amount: Set(amount),
        payment_method: Set(payment_method.to_string()),
        transaction_id: Set(transaction_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        error!(order_id = %order.id, error = %e, "payment record creation failed");
        CheckoutError::PaymentPersistence(e.to_string())
    })?;

    let mut carrying: order::ActiveModel = order.clone().into();
    carrying.total_paid_real = Set(order.total_paid_real + amount);
    carrying.updated_at = Set(Utc::now());
    carrying.update(conn).await.map_err(|e| {
        error!(order_id = %order.id, error = %e, "payment total update failed");
        CheckoutError::PaymentPersistence(e.to_string())
    })?;

    info!(
        order_id = %order.id,
        reference = %order.reference,
        amount = %amount,
        "payment recorded"
    );
    Ok(payment)
}

/// Appends one state transition to the order's audit trail.
pub async fn append_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    state_id: Uuid,
) -> Result<order_history::Model, CheckoutError> {
    let row = order_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        state_id: Set(state_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(row)
}

/// Picks the secondary state an order with backordered lines moves into.
pub fn backorder_state(settings: &CheckoutSettings, state_is_paid: bool) -> Uuid {
    if state_is_paid {
        settings.backorder_paid_state_id
    } else {
        settings.backorder_unpaid_state_id
    }
}

/// Moves an order containing out-of-stock lines into the matching backorder
/// state, as a second history entry on top of the initial one.
///
/// Returns the state the order ends up in.
pub async fn apply_backorder_cascade<C: ConnectionTrait>(
    conn: &C,
    settings: &CheckoutSettings,
    order: &order::Model,
    details: &[order_detail::Model],
    state: &order_state::Model,
) -> Result<Option<Uuid>, CheckoutError> {
    if !settings.stock_management || !settings.backorder_status_enabled {
        return Ok(None);
    }
    if !details.iter().any(|d| d.quantity_in_stock < 0) {
        return Ok(None);
    }

    let next_state = backorder_state(settings, state.paid);
    append_history(conn, order.id, next_state).await?;
    let mut active: order::ActiveModel = order.clone().into();
    active.current_state_id = Set(next_state);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    info!(order_id = %order.id, state_id = %next_state, "order moved to backorder state");
    Ok(Some(next_state))
}

/// Flips the cart to `Converted`; from here on the idempotence guard rejects
/// any further validation of this cart.
///
/// The flip is conditional on the cart still being `Active`, so of two racing
/// validations only one commits: the loser matches zero rows and aborts its
/// transaction.
pub async fn mark_cart_converted<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
) -> Result<(), CheckoutError> {
    let flipped = cart::Entity::update_many()
        .set(cart::ActiveModel {
            status: Set(CartStatus::Converted),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(cart::Column::Id.eq(cart.id))
        .filter(cart::Column::Status.eq(CartStatus::Active))
        .exec(conn)
        .await?;
    if flipped.rows_affected == 0 {
        return Err(CheckoutError::CartAlreadyConverted(cart.id));
    }
    Ok(())
}
