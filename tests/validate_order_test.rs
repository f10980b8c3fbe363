mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use common::*;
use storefront_checkout::config::PaymentModuleInfo;
use storefront_checkout::entities::*;
use storefront_checkout::errors::CheckoutError;
use storefront_checkout::events::EventSender;
use storefront_checkout::hooks::HookStage;
use storefront_checkout::services::settlement::mark_cart_converted;
use storefront_checkout::services::CheckoutService;

#[tokio::test]
async fn single_address_cart_becomes_one_settled_order() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), 10).await;

    let harness = build_service(&fixture);
    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(126.00)))
        .await
        .unwrap();

    assert_eq!(outcome.orders.len(), 1);
    assert_eq!(outcome.reference.len(), 9);
    assert!(!outcome.downgraded);

    let order = &outcome.orders[0];
    assert_eq!(order.current_state_id, fixture.state_accepted.id);
    assert_eq!(order.total_products_tax_incl, dec!(120.00));
    assert_eq!(order.total_products_tax_excl, dec!(100.00));
    assert_eq!(order.total_shipping_tax_incl, dec!(6.00));
    assert_eq!(order.total_paid_tax_incl, dec!(126.00));
    assert_eq!(order.carrier_id, Some(fixture.carrier.id));

    // One history entry, one payment bound to the reference.
    let history = OrderHistory::find()
        .filter(order_history::Column::OrderId.eq(order.id))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state_id, fixture.state_accepted.id);

    let payments = OrderPayment::find().all(db.as_ref()).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].order_reference, outcome.reference);
    assert_eq!(payments[0].amount, dec!(126.00));

    let cart = Cart::find_by_id(cart.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Converted);

    let sent = harness.mail.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].variables["order_name"], outcome.reference);

    let synced = harness.stock.synced.lock().unwrap();
    assert_eq!(synced.len(), 1);
}

#[tokio::test]
async fn second_validation_of_the_same_cart_is_rejected() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let harness = build_service(&fixture);
    harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap();

    let err = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::CartAlreadyConverted(id) if id == cart.id);
    assert_eq!(Order::find().count(db.as_ref()).await.unwrap(), 1);
}

#[tokio::test]
async fn guard_failures_abort_before_any_write() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;
    let harness = build_service(&fixture);

    let err = harness
        .service
        .validate_order(request(cart.id, Uuid::new_v4(), dec!(15.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::OrderStateNotFound(_));

    let mut bad_key = request(cart.id, fixture.state_accepted.id, dec!(15.00));
    bad_key.secure_key = Some("wrong".to_string());
    let err = harness.service.validate_order(bad_key).await.unwrap_err();
    assert_matches!(err, CheckoutError::SecureKeyMismatch(_));

    let err = harness
        .service
        .validate_order(request(Uuid::new_v4(), fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::CartAlreadyConverted(_));

    assert_eq!(Order::find().count(db.as_ref()).await.unwrap(), 0);
    let cart = Cart::find_by_id(cart.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Active);
}

#[tokio::test]
async fn inactive_payment_module_is_rejected() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let (events, _rx) = EventSender::channel(8);
    let mut module = PaymentModuleInfo::new("wirepayment");
    module.active = false;
    let service = CheckoutService::new(db.clone(), fixture.settings.clone(), module, events);

    let err = service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::ModuleInactive(name) if name == "wirepayment");
}

#[tokio::test]
async fn paid_amount_mismatch_parks_order_in_error_state() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), 10).await;

    let harness = build_service(&fixture);
    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(100.00)))
        .await
        .unwrap();

    assert!(outcome.downgraded);
    assert_eq!(outcome.orders[0].current_state_id, fixture.state_error.id);

    // The mismatch is not a failure: the order exists for back-office
    // reconciliation, but no payment is recorded and no email goes out.
    assert_eq!(OrderPayment::find().count(db.as_ref()).await.unwrap(), 0);
    assert!(harness.mail.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn supplied_reference_is_used_verbatim() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let harness = build_service(&fixture);
    let mut req = request(cart.id, fixture.state_accepted.id, dec!(15.00));
    req.reference = Some("GATEWAYRF".to_string());
    let outcome = harness.service.validate_order(req).await.unwrap();

    assert_eq!(outcome.reference, "GATEWAYRF");
    assert_eq!(outcome.orders[0].reference, "GATEWAYRF");
}

#[tokio::test]
async fn multi_address_cart_yields_sibling_orders_under_one_reference() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let second_address = insert_address(&db, Some(fixture.customer.id), "FR").await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), 10).await;
    insert_item(&db, cart.id, second_address.id, dec!(50.00), 1, dec!(20.00), 10).await;

    // 126.00 for the first package + 66.00 for the second.
    let harness = build_service(&fixture);
    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(192.00)))
        .await
        .unwrap();

    assert_eq!(outcome.orders.len(), 2);
    assert!(!outcome.downgraded);
    assert!(outcome.orders.iter().all(|o| o.reference == outcome.reference));

    let sum: rust_decimal::Decimal = outcome.orders.iter().map(|o| o.total_paid_tax_incl).sum();
    assert_eq!(sum, dec!(192.00));

    // One payment for the whole call, one confirmation email per order.
    assert_eq!(OrderPayment::find().count(db.as_ref()).await.unwrap(), 1);
    assert_eq!(harness.mail.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn backordered_line_cascades_into_backorder_state() {
    let db = Arc::new(test_db().await);
    let mut fixture = seed_shop(db.clone()).await;
    fixture.settings.backorder_status_enabled = true;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), -1).await;

    let harness = build_service(&fixture);
    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(126.00)))
        .await
        .unwrap();

    let order = &outcome.orders[0];
    assert_eq!(order.current_state_id, fixture.state_backorder_paid.id);

    let history = OrderHistory::find()
        .filter(order_history::Column::OrderId.eq(order.id))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|h| h.state_id == fixture.state_accepted.id));
    assert!(history
        .iter()
        .any(|h| h.state_id == fixture.state_backorder_paid.id));
}

#[tokio::test]
async fn missing_delivery_option_is_back_filled() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    // No stored delivery option at all.
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let harness = build_service(&fixture);
    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap();

    assert_eq!(outcome.orders[0].carrier_id, Some(fixture.carrier.id));
    let carriers = OrderCarrier::find().all(db.as_ref()).await.unwrap();
    assert_eq!(carriers.len(), 1);
    assert_eq!(carriers[0].shipping_cost_tax_excl, dec!(5.00));
}

#[tokio::test]
async fn inactive_destination_country_aborts_the_call() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let dead_address = insert_address(&db, Some(fixture.customer.id), "XX").await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, dead_address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let harness = build_service(&fixture);
    let err = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(15.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::InactiveCountry(code) if code == "XX");

    assert_eq!(Order::find().count(db.as_ref()).await.unwrap(), 0);
    let cart = Cart::find_by_id(cart.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Active);
}

#[tokio::test]
async fn before_validate_hook_can_redirect_the_target_state() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), 10).await;

    let harness = build_service(&fixture);
    let redirected = fixture.state_backorder_paid.id;
    harness
        .service
        .hooks()
        .register(HookStage::BeforeValidate, move |payload| {
            payload.target_state_id = redirected;
            Ok(())
        });

    let outcome = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(126.00)))
        .await
        .unwrap();
    assert_eq!(outcome.orders[0].current_state_id, redirected);
}

#[tokio::test]
async fn failing_business_hook_rolls_everything_back() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(100.00), 1, dec!(20.00), 10).await;

    let harness = build_service(&fixture);
    harness
        .service
        .hooks()
        .register(HookStage::OrderValidated, |_| Err("fraud check refused".into()));

    let err = harness
        .service
        .validate_order(request(cart.id, fixture.state_accepted.id, dec!(126.00)))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::Hook { .. });

    assert_eq!(Order::find().count(db.as_ref()).await.unwrap(), 0);
    assert_eq!(OrderPayment::find().count(db.as_ref()).await.unwrap(), 0);
    let cart = Cart::find_by_id(cart.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Active);
    assert!(harness.mail.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn payment_page_message_is_saved_as_private_note() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;
    insert_item(&db, cart.id, fixture.address.id, dec!(10.00), 1, dec!(0.00), 5).await;

    let harness = build_service(&fixture);
    let mut req = request(cart.id, fixture.state_accepted.id, dec!(15.00));
    req.message = Some("  please ring twice  ".to_string());
    let outcome = harness.service.validate_order(req).await.unwrap();

    let notes = OrderNote::find().all(db.as_ref()).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].body, "please ring twice");
    assert!(notes[0].private);
    assert_eq!(notes[0].order_id, Some(outcome.orders[0].id));
}

#[tokio::test]
async fn stale_cart_snapshot_cannot_be_converted_twice() {
    let db = Arc::new(test_db().await);
    let fixture = seed_shop(db.clone()).await;
    let cart = insert_cart(&fixture, None).await;

    // Two racing validations hold the same Active snapshot; the
    // status-conditional flip lets only the first one through.
    mark_cart_converted(db.as_ref(), &cart).await.unwrap();
    let err = mark_cart_converted(db.as_ref(), &cart).await.unwrap_err();
    assert_matches!(err, CheckoutError::CartAlreadyConverted(id) if id == cart.id);
}
