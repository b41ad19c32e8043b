use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item, order,
        order::{OrderStatus, PaymentStatus, TRANSACTION_ID_SENTINEL},
        product, sold_product, user, Cart, CartItem, CartItemModel, OrderModel, Product, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    mailer::Mailer,
    payments::{Charge, ChargeRequest, PaymentGateway},
    services::inventory,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Checkout coordinator: converts a user's open cart into a paid order.
///
/// The flow is a saga with two local transactions straddling one external
/// call. Phase 1 prices the cart, detaches it from the user and creates a
/// pending order, all in one transaction; the commit of that transaction is
/// what makes a cart checkout-able at most once. Phase 2 charges the gateway
/// outside any transaction, because an external call's duration and outcome
/// uncertainty must not hold database locks. Phase 3 settles inventory, the
/// sales ledger and the order in a second transaction. A failure between
/// phases leaves the order `pending` and visible for reconciliation; the
/// coordinator never guesses a charge outcome and never retries a charge.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            mailer,
            config,
        }
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn checkout(&self, input: CheckoutInput) -> Result<CheckoutOutcome, ServiceError> {
        if input.payment_token.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "payment token not found".to_string(),
            ));
        }
        input.address.validate()?;

        // Phase 1: price and reserve in one local transaction.
        let reservation = self.price_and_reserve(&input).await?;
        let order_id = reservation.order.id;

        // Phase 2: charge the gateway, outside any local transaction. On any
        // failure the order stays `pending`: the charge outcome may be
        // unknown, so it is never auto-cancelled here.
        let request = ChargeRequest::new(
            reservation.total_minor,
            self.config.currency.clone(),
            input.payment_token.clone(),
            self.config.charge_description.clone(),
            order_id,
        );
        let charge = match self.gateway.charge(&request).await {
            Ok(charge) => charge,
            Err(e) => {
                warn!(
                    order_id = %order_id,
                    "charge failed; order left pending for reconciliation: {}", e
                );
                self.event_sender
                    .send_or_log(Event::PaymentDeclined { order_id })
                    .await;
                return Err(e);
            }
        };
        if !charge.paid {
            warn!(order_id = %order_id, charge_id = %charge.charge_id, "charge not approved");
            self.event_sender
                .send_or_log(Event::PaymentDeclined { order_id })
                .await;
            return Err(ServiceError::PaymentFailed(
                "the charge was not approved".to_string(),
            ));
        }

        // Phase 3: settle. Never retry the charge from here; a paid order
        // that cannot be settled is surfaced, not dropped.
        let order = match self.settle(&reservation, &charge).await {
            Ok(order) => order,
            Err(e) => {
                error!(
                    order_id = %order_id,
                    charge_id = %charge.charge_id,
                    "settlement failed after successful charge; order requires reconciliation: {}",
                    e
                );
                self.event_sender
                    .send_or_log(Event::SettlementFailed { order_id })
                    .await;
                return Err(ServiceError::InternalError(
                    "order could not be settled".to_string(),
                ));
            }
        };

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                total_minor: reservation.total_minor,
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                order_id,
                charge_id: charge.charge_id.clone(),
            })
            .await;

        // Best-effort receipt; a mail failure never fails the checkout.
        let receipt_mailed = self
            .mailer
            .send(
                &reservation.user_email,
                "Your order is confirmed",
                &format!(
                    "Order {} has been received and will be processed shortly.",
                    order.id
                ),
            )
            .await;

        info!(order_id = %order_id, receipt_mailed, "checkout completed");
        Ok(CheckoutOutcome {
            order,
            receipt_mailed,
        })
    }

    /// Phase 1: one transaction that snapshots the cart, detaches it from the
    /// user, verifies availability and creates the pending order. Any
    /// shortfall aborts the whole transaction; no partial order is created.
    async fn price_and_reserve(&self, input: &CheckoutInput) -> Result<Reservation, ServiceError> {
        let txn = self.db.begin().await?;

        let user = User::find_by_id(input.user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", input.user_id)))?;

        let cart_id = user.cart_id.ok_or_else(|| {
            ServiceError::InvalidOperation("add items to cart before checkout".to_string())
        })?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        if cart.checkout {
            return Err(ServiceError::InvalidOperation(
                "add items to cart before checkout".to_string(),
            ));
        }

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::Checkout.eq(false))
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "add items to cart before checkout".to_string(),
            ));
        }

        // Detach the cart so concurrent add-to-cart calls start a fresh cart
        // and a second checkout of this cart sees "cart empty".
        let user_email = user.email.clone();
        let mut user_update: user::ActiveModel = user.into();
        user_update.cart_id = Set(None);
        user_update.update(&txn).await?;

        // Availability check against current stock, inside the same
        // transaction as the order creation.
        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products: HashMap<Uuid, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut total = Decimal::ZERO;
        for item in &items {
            let product = products.get(&item.product_id).ok_or_else(|| {
                ServiceError::Conflict(format!("product {} no longer exists", item.product_id))
            })?;
            inventory::ensure_available(product, item.quantity)?;

            // Snapshot price from add-time, never the current catalog price.
            total += item.price * Decimal::from(item.quantity);
        }
        let total_minor = to_minor_units(total)?;

        let ordered_at = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(input.user_id),
            cart_id: Set(cart_id),
            address: Set(serde_json::to_value(&input.address)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            tel: Set(input.tel.clone()),
            total_price: Set(total_minor),
            currency: Set(self.config.currency.clone()),
            transaction_id: Set(TRANSACTION_ID_SENTINEL.to_string()),
            receipt_url: Set(None),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Created),
            ordered_at: Set(ordered_at),
            updated_at: Set(ordered_at),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        Ok(Reservation {
            order,
            cart_id,
            items,
            user_email,
            total_minor,
            ordered_at,
        })
    }

    /// Phase 3: one transaction that decrements stock, appends the sales
    /// ledger, finalizes the order and closes the cart.
    async fn settle(
        &self,
        reservation: &Reservation,
        charge: &Charge,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        for item in &reservation.items {
            match inventory::take_stock(&txn, item.product_id, item.quantity).await {
                Ok(()) => {}
                Err(ServiceError::InsufficientStock(_)) | Err(ServiceError::NotFound(_)) => {
                    // Phase 1 verified this stock; losing it between phases is
                    // a store-level inconsistency, not a user error.
                    error!(
                        order_id = %reservation.order.id,
                        product_id = %item.product_id,
                        "inventory reservation lost between reservation and settlement"
                    );
                    return Err(ServiceError::InternalError(format!(
                        "stock for product {} vanished after reservation",
                        item.product_id
                    )));
                }
                Err(e) => return Err(e),
            }

            sold_product::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                ordered_at: Set(reservation.ordered_at),
            }
            .insert(&txn)
            .await?;
        }

        let mut order_update: order::ActiveModel = reservation.order.clone().into();
        order_update.payment_status = Set(PaymentStatus::Successful);
        order_update.order_status = Set(OrderStatus::Received);
        order_update.transaction_id = Set(charge.charge_id.clone());
        order_update.receipt_url = Set(charge.receipt_url.clone());
        order_update.updated_at = Set(Utc::now());
        let order = order_update.update(&txn).await?;

        // Close the cart and its items; the cart is never reopened.
        Cart::update_many()
            .col_expr(cart::Column::Checkout, Expr::value(true))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(reservation.cart_id))
            .exec(&txn)
            .await?;
        CartItem::update_many()
            .col_expr(cart_item::Column::Checkout, Expr::value(true))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::CartId.eq(reservation.cart_id))
            .filter(cart_item::Column::Checkout.eq(false))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(order)
    }
}

/// Convert a decimal total into minor currency units, rounding half away from
/// zero the way the storefront has always priced.
pub(crate) fn to_minor_units(total: Decimal) -> Result<i64, ServiceError> {
    (total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError("order total overflow".to_string()))
}

/// Shipping destination captured on the order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    pub landmark: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub state: String,
    pub zip: u32,
    #[validate(length(min = 1))]
    pub country: String,
    #[validate(length(min = 1))]
    pub street: String,
}

/// Input for a checkout call
#[derive(Debug, Deserialize)]
pub struct CheckoutInput {
    pub user_id: Uuid,
    pub address: ShippingAddress,
    pub tel: String,
    pub payment_token: String,
}

/// Result of a successful checkout
#[derive(Debug, Serialize)]
pub struct CheckoutOutcome {
    pub order: OrderModel,
    pub receipt_mailed: bool,
}

/// Cart snapshot carried from the reservation transaction into settlement.
struct Reservation {
    order: OrderModel,
    cart_id: Uuid,
    items: Vec<CartItemModel>,
    user_email: String,
    total_minor: i64,
    ordered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_scale_by_one_hundred() {
        assert_eq!(to_minor_units(dec!(10.00)).unwrap(), 1000);
        assert_eq!(to_minor_units(dec!(5.00)).unwrap(), 500);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(19.995)).unwrap(), 2000);
        assert_eq!(to_minor_units(dec!(19.994)).unwrap(), 1999);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 1);
    }

    #[test]
    fn minor_units_overflow_is_an_error() {
        let huge = Decimal::MAX;
        assert!(to_minor_units(huge).is_err());
    }

    #[test]
    fn snapshot_total_is_price_times_quantity() {
        // Two units priced 5.00 at add-time come to 1000 minor units,
        // regardless of what the catalog says now.
        let total = dec!(5.00) * Decimal::from(2);
        assert_eq!(to_minor_units(total).unwrap(), 1000);
    }

    #[test]
    fn checkout_input_deserializes_full_address() {
        let json = r#"{
            "user_id": "550e8400-e29b-41d4-a716-446655440000",
            "address": {
                "line1": "221B",
                "line2": null,
                "landmark": "opposite park",
                "city": "Mumbai",
                "state": "MH",
                "zip": 400001,
                "country": "IN",
                "street": "Baker Street"
            },
            "tel": "+91-9999999999",
            "payment_token": "tok_visa"
        }"#;

        let input: CheckoutInput = serde_json::from_str(json).expect("valid payload");
        assert_eq!(input.address.city, "Mumbai");
        assert_eq!(input.address.zip, 400001);
        assert!(input.address.line2.is_none());
    }
}
