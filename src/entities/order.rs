use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel stored in `transaction_id` until the gateway confirms a charge.
pub const TRANSACTION_ID_SENTINEL: &str = "null";

/// Committed order.
///
/// Created by the checkout coordinator with `payment_status = pending` before
/// the external charge, then settled to `successful`/`received` in a second
/// transaction. `total_price` is in minor currency units and is immutable once
/// set. Only the checkout and cancellation coordinators mutate order rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    #[sea_orm(column_type = "Json")]
    pub address: Json,
    pub tel: String,
    /// Order total in minor currency units (e.g. cents), fixed at creation.
    pub total_price: i64,
    pub currency: String,
    pub transaction_id: String,
    #[sea_orm(nullable)]
    pub receipt_url: Option<String>,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub ordered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
    #[sea_orm(has_many = "super::refund::Entity")]
    Refunds,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<super::refund::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Refunds.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment lifecycle of an order. Closed enumeration; unknown values are
/// rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "successful")]
    Successful,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refund_started")]
    RefundStarted,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "refund_failed")]
    RefundFailed,
}

/// Fulfilment lifecycle of an order, independent of payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "dispatched")]
    Dispatched,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}
