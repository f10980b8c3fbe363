use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A voucher: a discount instrument with usage constraints.
///
/// `quantity` is the remaining global usage budget; it is decremented on
/// consumption and never goes below zero. A partial-use amount voucher whose
/// value exceeds a single order's payable total is cloned into a remainder
/// voucher during checkout.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Textual code customers type in; empty for rules applied automatically.
    pub code: String,
    pub name: String,
    pub active: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub reduction_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((9, 4)))")]
    pub reduction_percent: Decimal,
    /// Whether `reduction_amount` is expressed tax included.
    pub reduction_tax: bool,
    pub reduction_currency: String,
    pub free_shipping: bool,
    pub partial_use: bool,
    pub quantity: i32,
    pub quantity_per_user: i32,
    pub customer_id: Option<Uuid>,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub minimum_amount: Decimal,
    pub gift_product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// An amount-based reduction, as opposed to a percent one or a pure gift.
    pub fn is_amount_reduction(&self) -> bool {
        self.reduction_amount > Decimal::ZERO
    }
}
