use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product.
///
/// `quantity` is the on-hand stock and must never go negative; every decrement
/// goes through the guarded helpers in `services::inventory`. The review
/// aggregates are maintained incrementally by the feedback service and are
/// never touched by the checkout or cancellation paths.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub currency: String,
    pub quantity: i32,
    pub total_stars: i32,
    pub total_reviews: i32,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub average_review: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::sold_product::Entity")]
    SoldProducts,
    #[sea_orm(has_many = "super::feedback::Entity")]
    Feedback,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::sold_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SoldProducts.def()
    }
}

impl Related<super::feedback::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Feedback.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
