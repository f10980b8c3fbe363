use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted purchase unit: one per (cart, delivery address) package.
///
/// Sibling orders materialized from the same cart share one `reference`.
/// Totals are immutable once created; only the state transitions afterwards,
/// through appended `order_history` rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cart_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 6)))")]
    pub conversion_rate: Decimal,
    pub reference: String,
    pub delivery_address_id: Uuid,
    pub invoice_address_id: Uuid,
    pub carrier_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((9, 4)))")]
    pub carrier_tax_rate: Decimal,
    pub current_state_id: Uuid,
    pub payment_method: String,
    pub module: String,
    pub secure_key: String,
    pub gift: bool,
    pub gift_message: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_products_tax_incl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_products_tax_excl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_discounts_tax_incl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_discounts_tax_excl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_shipping_tax_incl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_shipping_tax_excl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_wrapping_tax_incl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_wrapping_tax_excl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_paid_tax_incl: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_paid_tax_excl: Decimal,
    /// Amount actually recorded against the order by payments.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_paid_real: Decimal,

    /// Rounding snapshot the totals were computed with.
    pub round_precision: i32,
    pub round_mode: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_detail::Entity")]
    OrderDetails,
    #[sea_orm(has_many = "super::order_history::Entity")]
    History,
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
}

impl Related<super::order_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderDetails.def()
    }
}

impl Related<super::order_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
