//! Integration tests for the checkout saga.
//!
//! Covers the reserve → charge → settle flow, the failure seams between the
//! phases, price snapshots and the single-checkout-per-cart guarantee.

mod common;

use assert_matches::assert_matches;
use common::{GatewayMode, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::{
    entities::{
        cart_item, order,
        order::{OrderStatus, PaymentStatus, TRANSACTION_ID_SENTINEL},
        sold_product, Cart, CartItem, Order, Product, SoldProduct, User,
    },
    errors::ServiceError,
    services::carts::AddToCartInput,
};

#[tokio::test]
async fn scenario_a_checkout_success() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    // Two units at 5.00 come to 1000 minor units.
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 2,
        })
        .await
        .expect("add to cart");

    let outcome = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect("checkout should succeed");

    assert_eq!(outcome.order.total_price, 1000);
    assert_eq!(outcome.order.payment_status, PaymentStatus::Successful);
    assert_eq!(outcome.order.order_status, OrderStatus::Received);
    assert_ne!(outcome.order.transaction_id, TRANSACTION_ID_SENTINEL);
    assert!(outcome.order.receipt_url.is_some());
    assert!(outcome.receipt_mailed);

    // Stock decremented and the sale recorded in the same settlement.
    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.quantity, 3);

    let sold = SoldProduct::find()
        .filter(sold_product::Column::ProductId.eq(product.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].quantity, 2);

    // Cart closed, items closed, user detached from the cart.
    let cart_row = Cart::find_by_id(outcome.order.cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(cart_row.checkout);

    let open_items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_row.id))
        .filter(cart_item::Column::Checkout.eq(false))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(open_items.is_empty());

    let user_after = User::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user_after.cart_id, None);

    // Exactly one charge was issued for the checkout.
    assert_eq!(app.gateway.charge_count(), 1);
}

#[tokio::test]
async fn scenario_b_insufficient_stock_aborts_reservation() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Scarce", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 3,
        })
        .await
        .expect("add to cart");

    // Stock drops below the cart's demand before checkout.
    app.state
        .services
        .catalog
        .update_product(
            product.id,
            storefront_api::services::catalog::UpdateProductInput {
                quantity: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("shrink stock");

    let err = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect_err("checkout must fail on shortfall");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The whole reservation transaction rolled back: no order row, stock
    // untouched, the cart still belongs to the user.
    let orders = Order::find()
        .filter(order::Column::UserId.eq(user.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(orders.is_empty());

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.quantity, 2);

    let user_after = User::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(user_after.cart_id.is_some());

    assert_eq!(app.gateway.charge_count(), 0);
}

#[tokio::test]
async fn scenario_c_gateway_failure_leaves_order_pending() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 2,
        })
        .await
        .expect("add to cart");

    app.gateway.set_mode(GatewayMode::Decline);

    let err = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect_err("checkout must surface the declined charge");
    assert_matches!(err, ServiceError::PaymentFailed(_));

    // The pending order survives for reconciliation; nothing was settled.
    let orders = Order::find()
        .filter(order::Column::UserId.eq(user.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::Pending);
    assert_eq!(orders[0].order_status, OrderStatus::Created);
    assert_eq!(orders[0].transaction_id, TRANSACTION_ID_SENTINEL);

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.quantity, 5);

    let sold = SoldProduct::find().all(&*app.state.db).await.unwrap();
    assert!(sold.is_empty());

    // The cart was detached but never closed.
    let cart_row = Cart::find_by_id(orders[0].cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(!cart_row.checkout);
}

#[tokio::test]
async fn unapproved_charge_leaves_order_pending() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 1,
        })
        .await
        .expect("add to cart");

    app.gateway.set_mode(GatewayMode::ApproveUnpaid);

    let err = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect_err("unpaid charge must fail the checkout");
    assert_matches!(err, ServiceError::PaymentFailed(_));

    let orders = Order::find()
        .filter(order::Column::UserId.eq(user.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::Pending);

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.quantity, 5);
}

#[tokio::test]
async fn missing_payment_token_is_rejected_before_any_mutation() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 1,
        })
        .await
        .expect("add to cart");

    let mut input = app.checkout_input(user.id);
    input.payment_token = "   ".to_string();

    let err = app
        .state
        .services
        .checkout
        .checkout(input)
        .await
        .expect_err("blank token must be rejected");
    assert_matches!(err, ServiceError::ValidationError(_));

    // No order, and the cart is still attached to the user.
    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert!(orders.is_empty());
    let user_after = User::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(user_after.cart_id.is_some());
}

#[tokio::test]
async fn empty_cart_checkout_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;

    let err = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect_err("empty cart must be rejected");
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn second_checkout_of_same_cart_fails() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 2,
        })
        .await
        .expect("add to cart");

    app.state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect("first checkout succeeds");

    // The cart was detached by the first call's reservation commit.
    let err = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect_err("second checkout must fail");
    assert_matches!(err, ServiceError::InvalidOperation(_));

    let orders = Order::find()
        .filter(order::Column::UserId.eq(user.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1, "exactly one order per cart");
    assert_eq!(app.gateway.charge_count(), 1);
}

#[tokio::test]
async fn order_total_uses_add_time_price_snapshot() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 2,
        })
        .await
        .expect("add to cart");

    // Catalog price changes after the item went into the cart.
    app.state
        .services
        .catalog
        .update_product(
            product.id,
            storefront_api::services::catalog::UpdateProductInput {
                price: Some(dec!(9.99)),
                ..Default::default()
            },
        )
        .await
        .expect("reprice product");

    let outcome = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect("checkout should succeed");

    // Still the add-time price: 2 x 5.00, not 2 x 9.99.
    assert_eq!(outcome.order.total_price, 1000);
}

#[tokio::test]
async fn each_checkout_charges_once_with_a_fresh_key() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(5.00), 10).await;

    for email in ["a@example.com", "b@example.com"] {
        let user = app.seed_user(email).await;
        app.state
            .services
            .cart
            .add_item(AddToCartInput {
                user_id: user.id,
                product_id: product.id,
                quantity: 1,
            })
            .await
            .expect("add to cart");
        app.state
            .services
            .checkout
            .checkout(app.checkout_input(user.id))
            .await
            .expect("checkout succeeds");
    }

    let keys = app.gateway.recorded_idempotency_keys();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1], "idempotency keys are fresh per call");
}

#[tokio::test]
async fn mail_failure_does_not_fail_checkout() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id: product.id,
            quantity: 1,
        })
        .await
        .expect("add to cart");

    app.mailer.fail_next_sends();

    let outcome = app
        .state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect("checkout succeeds despite mail failure");

    assert!(!outcome.receipt_mailed);
    assert_eq!(outcome.order.payment_status, PaymentStatus::Successful);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let app = TestApp::new().await;
    let product = app.seed_product("Limited", dec!(5.00), 5).await;

    // Four buyers want two units each; at most two can settle.
    let mut tasks = vec![];
    for i in 0..4 {
        let user = app.seed_user(&format!("buyer{}@example.com", i)).await;
        app.state
            .services
            .cart
            .add_item(AddToCartInput {
                user_id: user.id,
                product_id: product.id,
                quantity: 2,
            })
            .await
            .expect("add to cart");

        let checkout = app.state.services.checkout.clone();
        let input = app.checkout_input(user.id);
        tasks.push(tokio::spawn(async move {
            checkout.checkout(input).await.is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            successes += 1;
        }
    }

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();

    assert!(product_after.quantity >= 0, "stock must never go negative");
    assert!(
        successes * 2 <= 5,
        "reserved quantity exceeded on-hand stock: {} checkouts settled",
        successes
    );
    assert_eq!(product_after.quantity, 5 - successes * 2);
}
