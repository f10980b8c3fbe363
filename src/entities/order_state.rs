use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status taxonomy reference data.
///
/// `logable` marks states representing a real sale for accounting purposes:
/// only logable states record payments and consume vouchers.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub logable: bool,
    /// Whether reaching this state produces an invoice.
    pub invoice: bool,
    pub send_email: bool,
    /// Whether this state means the order has been paid.
    pub paid: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
