use crate::{
    entities::{cart, cart_item, user, Cart, CartItem, CartItemModel, Product, User},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Per-item quantity bounds enforced by store policy.
pub const MIN_ITEM_QUANTITY: i32 = 1;
pub const MAX_ITEM_QUANTITY: i32 = 5;

/// Cart store: a user's single open cart and its items.
///
/// Carts are created lazily on the first add. The snapshot fields on each
/// item (name, description, price) are copied from the product at add-time;
/// the checkout total is computed from those snapshots, never from the
/// current catalog price.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the open items of the user's active cart; an empty list when
    /// the user has no open cart.
    #[instrument(skip(self))]
    pub async fn get_active_items(&self, user_id: Uuid) -> Result<Vec<CartItemModel>, ServiceError> {
        let user = User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let Some(cart_id) = user.cart_id else {
            return Ok(Vec::new());
        };

        let cart = Cart::find_by_id(cart_id).one(&*self.db).await?;
        match cart {
            Some(cart) if !cart.checkout => Ok(cart
                .find_related(CartItem)
                .filter(cart_item::Column::Checkout.eq(false))
                .all(&*self.db)
                .await?),
            _ => Ok(Vec::new()),
        }
    }

    /// Adds a product to the user's cart, creating the cart lazily on first
    /// use. Rejects a second open item for the same product; quantity is
    /// bounded to 1–5 per item.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, product_id = %input.product_id))]
    pub async fn add_item(&self, input: AddToCartInput) -> Result<CartItemModel, ServiceError> {
        if !(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&input.quantity) {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between {} and {} per item",
                MIN_ITEM_QUANTITY, MAX_ITEM_QUANTITY
            )));
        }

        let txn = self.db.begin().await?;

        let user = User::find_by_id(input.user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", input.user_id)))?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.quantity > 0)
            .ok_or_else(|| {
                ServiceError::InvalidOperation(
                    "product does not exist or is not available".to_string(),
                )
            })?;

        let now = Utc::now();
        let (cart_id, cart_created) = match user.cart_id {
            Some(cart_id) => (cart_id, false),
            None => {
                let cart_id = Uuid::new_v4();
                cart::ActiveModel {
                    id: Set(cart_id),
                    user_id: Set(user.id),
                    checkout: Set(false),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;

                let mut user_update: user::ActiveModel = user.into();
                user_update.cart_id = Set(Some(cart_id));
                user_update.update(&txn).await?;

                (cart_id, true)
            }
        };

        // At most one open item per (cart, product) pair.
        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(cart_item::Column::Checkout.eq(false))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "item already exists in the cart".to_string(),
            ));
        }

        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(product.id),
            user_id: Set(input.user_id),
            name: Set(product.name.clone()),
            description: Set(product.description.clone()),
            price: Set(product.price),
            quantity: Set(input.quantity),
            checkout: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        if cart_created {
            self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{}",
            cart_id, input.product_id, input.quantity
        );
        Ok(item)
    }

    /// Steps an open item's quantity by +1 or -1, keeping it within 1–5.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        delta: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if delta != 1 && delta != -1 {
            return Err(ServiceError::ValidationError(
                "quantity step must be 1 or -1".to_string(),
            ));
        }

        let user = User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let cart_id = user
            .cart_id
            .ok_or_else(|| ServiceError::InvalidOperation("cart is empty".to_string()))?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::Checkout.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("cart item not found".to_string()))?;

        let quantity = item.quantity + delta;
        if !(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "only {} to {} of an item per order",
                MIN_ITEM_QUANTITY, MAX_ITEM_QUANTITY
            )));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartItemQuantityChanged {
                cart_id,
                product_id,
                quantity,
            })
            .await;

        Ok(updated)
    }

    /// Removes an open item from its cart. Closed items are order history and
    /// cannot be removed.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, item_id: Uuid) -> Result<(), ServiceError> {
        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::Checkout.eq(false))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("cannot find cart item to delete with specified id".to_string())
            })?;

        let cart_id = item.cart_id;
        item.delete(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved { cart_id, item_id })
            .await;

        Ok(())
    }
}

/// Input for adding an item to a cart
#[derive(Debug, Deserialize)]
pub struct AddToCartInput {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds_cover_policy_range() {
        assert!((MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&1));
        assert!((MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&5));
        assert!(!(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&0));
        assert!(!(MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&6));
    }

    #[test]
    fn add_to_cart_input_deserialization() {
        let json = r#"{
            "user_id": "550e8400-e29b-41d4-a716-446655440000",
            "product_id": "650e8400-e29b-41d4-a716-446655440000",
            "quantity": 3
        }"#;

        let input: AddToCartInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(input.quantity, 3);
    }
}
