#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::{ColumnType, TableCreateStatement};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, Set,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use storefront_checkout::config::{CheckoutSettings, PaymentModuleInfo};
use storefront_checkout::entities::*;
use storefront_checkout::errors::CheckoutError;
use storefront_checkout::events::EventSender;
use storefront_checkout::services::{
    CheckoutService, MailMessage, MailService, StockSynchronizer, ValidateOrderRequest,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// sea-query's SQLite builder panics on decimal columns with precision > 16,
/// while the entities declare money columns as `Decimal(19, 4)`. Rebuild the
/// generated statement with the precision clamped so the in-memory SQLite
/// schema can be created.
fn clamp_decimals(stmt: TableCreateStatement) -> TableCreateStatement {
    let mut out = TableCreateStatement::new();
    if let Some(table) = stmt.get_table_name() {
        out.table(table.clone());
    }
    for column in stmt.get_columns() {
        let mut column = column.clone();
        if let Some(ColumnType::Decimal(Some((precision, scale)))) = column.get_column_type() {
            if *precision > 16 {
                let scale = *scale;
                column.decimal_len(16, scale);
            }
        }
        out.col(column);
    }
    for index in stmt.get_indexes() {
        out.index(&mut index.clone());
    }
    for foreign_key in stmt.get_foreign_key_create_stmts() {
        out.foreign_key(&mut foreign_key.clone());
    }
    out
}

pub async fn test_db() -> DatabaseConnection {
    init_tracing();
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Address))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Carrier))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Cart))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(CartCoupon))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(CartItem))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(CartRule))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Country))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Currency))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Customer))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(Order))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderCarrier))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderCartRule))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderDetail))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderHistory))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderNote))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderPayment))))
        .await
        .unwrap();
    db.execute(backend.build(&clamp_decimals(schema.create_table_from_entity(OrderState))))
        .await
        .unwrap();

    db
}

pub struct ShopFixture {
    pub db: Arc<DatabaseConnection>,
    pub settings: CheckoutSettings,
    pub state_accepted: OrderStateModel,
    pub state_error: OrderStateModel,
    pub state_canceled: OrderStateModel,
    pub state_backorder_paid: OrderStateModel,
    pub state_backorder_unpaid: OrderStateModel,
    pub carrier: CarrierModel,
    pub customer: CustomerModel,
    pub address: AddressModel,
}

async fn insert_state(
    db: &DatabaseConnection,
    name: &str,
    logable: bool,
    paid: bool,
    invoice: bool,
) -> OrderStateModel {
    order_state::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        logable: Set(logable),
        invoice: Set(invoice),
        send_email: Set(true),
        paid: Set(paid),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_shop(db: Arc<DatabaseConnection>) -> ShopFixture {
    let state_accepted = insert_state(&db, "Payment accepted", true, true, true).await;
    let state_error = insert_state(&db, "Payment error", false, false, false).await;
    let state_canceled = insert_state(&db, "Canceled", false, false, false).await;
    let state_backorder_paid = insert_state(&db, "On backorder (paid)", true, true, false).await;
    let state_backorder_unpaid =
        insert_state(&db, "On backorder (not paid)", true, false, false).await;

    country::ActiveModel {
        code: Set("FR".to_string()),
        name: Set("France".to_string()),
        active: Set(true),
        tax_rate: Set(dec!(20.00)),
    }
    .insert(db.as_ref())
    .await
    .unwrap();
    country::ActiveModel {
        code: Set("XX".to_string()),
        name: Set("Atlantis".to_string()),
        active: Set(false),
        tax_rate: Set(dec!(0.00)),
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let carrier = carrier::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Standard".to_string()),
        shipping_rate: Set(dec!(5.00)),
        active: Set(true),
        position: Set(0),
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    currency::ActiveModel {
        code: Set("EUR".to_string()),
        name: Set("Euro".to_string()),
        conversion_rate: Set(dec!(1.00)),
    }
    .insert(db.as_ref())
    .await
    .unwrap();
    currency::ActiveModel {
        code: Set("USD".to_string()),
        name: Set("US Dollar".to_string()),
        conversion_rate: Set(dec!(2.00)),
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let customer = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set("ada@example.com".to_string()),
        first_name: Set("Ada".to_string()),
        last_name: Set("Lovelace".to_string()),
        guest: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let address = insert_address(&db, Some(customer.id), "FR").await;

    let mut settings = CheckoutSettings::default();
    settings.error_state_id = state_error.id;
    settings.canceled_state_id = state_canceled.id;
    settings.backorder_paid_state_id = state_backorder_paid.id;
    settings.backorder_unpaid_state_id = state_backorder_unpaid.id;

    ShopFixture {
        db,
        settings,
        state_accepted,
        state_error,
        state_canceled,
        state_backorder_paid,
        state_backorder_unpaid,
        carrier,
        customer,
        address,
    }
}

pub async fn insert_address(
    db: &DatabaseConnection,
    customer_id: Option<Uuid>,
    country_code: &str,
) -> AddressModel {
    address::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(customer_id),
        first_name: Set("Ada".to_string()),
        last_name: Set("Lovelace".to_string()),
        company: Set(None),
        line1: Set("1 Main St".to_string()),
        line2: Set(None),
        city: Set("Lyon".to_string()),
        province: Set(None),
        postal_code: Set("69000".to_string()),
        country_code: Set(country_code.to_string()),
        phone: Set(None),
        other: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_cart(fixture: &ShopFixture, delivery_option: Option<serde_json::Value>) -> CartModel {
    let now = Utc::now();
    cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(Some(fixture.customer.id)),
        currency: Set("EUR".to_string()),
        secure_key: Set("sekrit".to_string()),
        invoice_address_id: Set(fixture.address.id),
        delivery_option: Set(delivery_option),
        gift: Set(false),
        gift_message: Set(None),
        status: Set(CartStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(fixture.db.as_ref())
    .await
    .unwrap()
}

pub async fn insert_item(
    db: &DatabaseConnection,
    cart_id: Uuid,
    address_id: Uuid,
    unit_price: Decimal,
    quantity: i32,
    tax_rate: Decimal,
    quantity_in_stock: i32,
) -> CartItemModel {
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(Uuid::new_v4()),
        name: Set("Widget".to_string()),
        reference: Set("SKU-1".to_string()),
        quantity: Set(quantity),
        unit_price_tax_excl: Set(unit_price),
        tax_rate: Set(tax_rate),
        weight: Set(dec!(0.50)),
        delivery_address_id: Set(address_id),
        is_virtual: Set(false),
        quantity_in_stock: Set(quantity_in_stock),
        customization: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn attach_rule(
    db: &DatabaseConnection,
    cart_id: Uuid,
    rule: cart_rule::ActiveModel,
) -> CartRuleModel {
    let rule = rule.insert(db).await.unwrap();
    cart_coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        cart_rule_id: Set(rule.id),
        applied_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .unwrap();
    rule
}

pub fn amount_voucher(code: &str, amount: Decimal, partial_use: bool) -> cart_rule::ActiveModel {
    let now = Utc::now();
    cart_rule::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        name: Set(format!("Voucher {code}")),
        active: Set(true),
        reduction_amount: Set(amount),
        reduction_percent: Set(Decimal::ZERO),
        reduction_tax: Set(true),
        reduction_currency: Set("EUR".to_string()),
        free_shipping: Set(false),
        partial_use: Set(partial_use),
        quantity: Set(10),
        quantity_per_user: Set(10),
        customer_id: Set(None),
        date_from: Set(now - Duration::days(1)),
        date_to: Set(now + Duration::days(30)),
        minimum_amount: Set(Decimal::ZERO),
        gift_product_id: Set(None),
        created_at: Set(now),
    }
}

#[derive(Clone, Default)]
pub struct RecordingMailService {
    pub sent: Arc<Mutex<Vec<MailMessage>>>,
}

#[async_trait]
impl MailService for RecordingMailService {
    async fn send(&self, message: MailMessage) -> Result<(), CheckoutError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingStockSynchronizer {
    pub synced: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl StockSynchronizer for RecordingStockSynchronizer {
    async fn reconcile(
        &self,
        order_id: Uuid,
        _error_state_id: Uuid,
        _canceled_state_id: Uuid,
    ) -> Result<(), CheckoutError> {
        self.synced.lock().unwrap().push(order_id);
        Ok(())
    }
}

pub struct TestHarness {
    pub service: CheckoutService,
    pub mail: RecordingMailService,
    pub stock: RecordingStockSynchronizer,
}

pub fn build_service(fixture: &ShopFixture) -> TestHarness {
    let mail = RecordingMailService::default();
    let stock = RecordingStockSynchronizer::default();
    let (events, _rx) = EventSender::channel(64);
    let service = CheckoutService::new(
        fixture.db.clone(),
        fixture.settings.clone(),
        PaymentModuleInfo::new("wirepayment"),
        events,
    )
    .with_mail(Arc::new(mail.clone()))
    .with_stock(Arc::new(stock.clone()));
    TestHarness {
        service,
        mail,
        stock,
    }
}

pub fn request(cart_id: Uuid, state_id: Uuid, amount: Decimal) -> ValidateOrderRequest {
    ValidateOrderRequest {
        cart_id,
        target_state_id: state_id,
        amount_paid: amount,
        payment_method: "Bank wire".to_string(),
        transaction_id: Some("txn-1".to_string()),
        reference: None,
        secure_key: Some("sekrit".to_string()),
        message: None,
    }
}
