use crate::{
    entities::{cart_item, feedback, product, CartItem, Feedback, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const MIN_STARS: i32 = 1;
const MAX_STARS: i32 = 5;

/// Product review service.
///
/// Maintains the denormalized aggregates on the product row
/// (`total_stars`, `total_reviews`, `average_review`) in the same transaction
/// as the feedback row, so they never drift. Only buyers of a product may
/// review it.
#[derive(Clone)]
pub struct FeedbackService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl FeedbackService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates or updates the user's review of a product, keeping the product
    /// aggregates consistent.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, product_id = %input.product_id))]
    pub async fn submit(&self, input: SubmitFeedbackInput) -> Result<(), ServiceError> {
        if !(MIN_STARS..=MAX_STARS).contains(&input.stars) {
            return Err(ServiceError::ValidationError(format!(
                "stars must be between {} and {}",
                MIN_STARS, MAX_STARS
            )));
        }

        self.ensure_purchased(input.user_id, input.product_id).await?;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let existing = Feedback::find()
            .filter(feedback::Column::ProductId.eq(input.product_id))
            .filter(feedback::Column::UserId.eq(input.user_id))
            .one(&txn)
            .await?;

        let now = Utc::now();
        let (total_stars, total_reviews) = match &existing {
            Some(feedback) => (
                product.total_stars + input.stars - feedback.stars,
                product.total_reviews,
            ),
            None => (product.total_stars + input.stars, product.total_reviews + 1),
        };

        match existing {
            Some(feedback) => {
                let mut active: feedback::ActiveModel = feedback.into();
                active.stars = Set(input.stars);
                if let Some(comment) = input.comment {
                    active.comment = Set(comment);
                }
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                feedback::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(input.product_id),
                    user_id: Set(input.user_id),
                    stars: Set(input.stars),
                    comment: Set(input.comment.unwrap_or_default()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let mut product_update: product::ActiveModel = product.into();
        product_update.total_stars = Set(total_stars);
        product_update.total_reviews = Set(total_reviews);
        product_update.average_review = Set(average_review(total_stars, total_reviews));
        product_update.updated_at = Set(now);
        product_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::FeedbackSubmitted {
                product_id: input.product_id,
                stars: input.stars,
            })
            .await;

        info!("Feedback recorded for product {}", input.product_id);
        Ok(())
    }

    /// Lists a product's reviews, newest first.
    pub async fn list_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<feedback::Model>, ServiceError> {
        Ok(Feedback::find()
            .filter(feedback::Column::ProductId.eq(product_id))
            .order_by_desc(feedback::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Removes the user's review and rolls its contribution out of the
    /// product aggregates.
    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let feedback = Feedback::find()
            .filter(feedback::Column::ProductId.eq(product_id))
            .filter(feedback::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("cannot find feedback to delete".to_string())
            })?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let total_stars = product.total_stars - feedback.stars;
        let total_reviews = product.total_reviews - 1;

        feedback.delete(&txn).await?;

        let mut product_update: product::ActiveModel = product.into();
        product_update.total_stars = Set(total_stars);
        product_update.total_reviews = Set(total_reviews);
        product_update.average_review = Set(average_review(total_stars, total_reviews));
        product_update.updated_at = Set(Utc::now());
        product_update.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// A user may only review products they have actually bought: a closed
    /// cart item for the pair must exist.
    async fn ensure_purchased(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let bought = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::Checkout.eq(true))
            .one(&*self.db)
            .await?
            .is_some();

        if !bought {
            return Err(ServiceError::Forbidden(
                "item was not purchased by this user".to_string(),
            ));
        }
        Ok(())
    }
}

fn average_review(total_stars: i32, total_reviews: i32) -> Decimal {
    if total_reviews <= 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(total_stars) / Decimal::from(total_reviews)).round_dp(2)
}

/// Input for submitting feedback
#[derive(Debug, Deserialize)]
pub struct SubmitFeedbackInput {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub stars: i32,
    pub comment: Option<String>,
}
