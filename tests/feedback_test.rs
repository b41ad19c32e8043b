//! Integration tests for product feedback and review aggregates.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{
    entities::{user, Product},
    errors::ServiceError,
    services::carts::AddToCartInput,
    services::feedback::SubmitFeedbackInput,
};

/// Buys one unit of the product for the user so reviews are allowed.
async fn purchase(app: &TestApp, user: &user::Model, product_id: uuid::Uuid) {
    app.state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: user.id,
            product_id,
            quantity: 1,
        })
        .await
        .expect("add to cart");
    app.state
        .services
        .checkout
        .checkout(app.checkout_input(user.id))
        .await
        .expect("checkout");
}

#[tokio::test]
async fn feedback_requires_a_purchase() {
    let app = TestApp::new().await;
    let user = app.seed_user("reviewer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;

    let err = app
        .state
        .services
        .feedback
        .submit(SubmitFeedbackInput {
            user_id: user.id,
            product_id: product.id,
            stars: 5,
            comment: None,
        })
        .await
        .expect_err("review without purchase must fail");
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn first_review_updates_product_aggregates() {
    let app = TestApp::new().await;
    let user = app.seed_user("reviewer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;
    purchase(&app, &user, product.id).await;

    app.state
        .services
        .feedback
        .submit(SubmitFeedbackInput {
            user_id: user.id,
            product_id: product.id,
            stars: 4,
            comment: Some("solid".to_string()),
        })
        .await
        .expect("submit feedback");

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.total_stars, 4);
    assert_eq!(product_after.total_reviews, 1);
    assert_eq!(product_after.average_review, dec!(4.00));
}

#[tokio::test]
async fn resubmitting_updates_stars_without_double_counting() {
    let app = TestApp::new().await;
    let user = app.seed_user("reviewer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;
    purchase(&app, &user, product.id).await;

    for stars in [2, 5] {
        app.state
            .services
            .feedback
            .submit(SubmitFeedbackInput {
                user_id: user.id,
                product_id: product.id,
                stars,
                comment: None,
            })
            .await
            .expect("submit feedback");
    }

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    // One review, re-scored from 2 to 5.
    assert_eq!(product_after.total_reviews, 1);
    assert_eq!(product_after.total_stars, 5);
    assert_eq!(product_after.average_review, dec!(5.00));

    let reviews = app
        .state
        .services
        .feedback
        .list_for_product(product.id)
        .await
        .expect("list feedback");
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].stars, 5);
}

#[tokio::test]
async fn stars_outside_bounds_are_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("reviewer@example.com").await;
    let product = app.seed_product("Widget", dec!(5.00), 5).await;
    purchase(&app, &user, product.id).await;

    for stars in [0, 6, -1] {
        let err = app
            .state
            .services
            .feedback
            .submit(SubmitFeedbackInput {
                user_id: user.id,
                product_id: product.id,
                stars,
                comment: None,
            })
            .await
            .expect_err("stars outside 1..=5 must fail");
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}

#[tokio::test]
async fn removing_a_review_rolls_back_its_aggregate_contribution() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(5.00), 10).await;

    let alice = app.seed_user("alice@example.com").await;
    purchase(&app, &alice, product.id).await;
    let bob = app.seed_user("bob@example.com").await;
    purchase(&app, &bob, product.id).await;

    for (user_id, stars) in [(alice.id, 5), (bob.id, 2)] {
        app.state
            .services
            .feedback
            .submit(SubmitFeedbackInput {
                user_id,
                product_id: product.id,
                stars,
                comment: None,
            })
            .await
            .expect("submit feedback");
    }

    app.state
        .services
        .feedback
        .remove(bob.id, product.id)
        .await
        .expect("remove feedback");

    let product_after = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.total_reviews, 1);
    assert_eq!(product_after.total_stars, 5);
    assert_eq!(product_after.average_review, dec!(5.00));
}
