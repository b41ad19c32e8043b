use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    errors::ApiError,
    services::carts::AddToCartInput,
    services::checkout::{CheckoutInput, ShippingAddress},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints.
///
/// Callers are authenticated upstream; requests carry the authenticated
/// `user_id` in the body the way the legacy API did.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(view_cart))
        .route("/items", post(add_item))
        .route("/items", put(update_quantity))
        .route("/items/:item_id", delete(remove_item))
        .route("/checkout", post(checkout))
}

/// View the open items of the user's active cart
async fn view_cart(
    State(state): State<AppState>,
    Json(payload): Json<ViewCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .services
        .cart
        .get_active_items(payload.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "cart": items })))
}

/// Add a product to the cart
async fn add_item(
    State(state): State<AppState>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let item = state
        .services
        .cart
        .add_item(AddToCartInput {
            user_id: payload.user_id,
            product_id: payload.product_id,
            quantity: payload.quantity.unwrap_or(1),
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "item_added": item })))
}

/// Step an item's quantity by +1 or -1
async fn update_quantity(
    State(state): State<AppState>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .update_quantity(payload.user_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Updated successfully"
    })))
}

/// Remove an open item from the cart
async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Convert the cart into a paid order
async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .checkout
        .checkout(CheckoutInput {
            user_id: payload.user_id,
            address: payload.address,
            tel: payload.tel,
            payment_token: payload.payment_token,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct ViewCartRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5))]
    pub quantity: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
    /// +1 or -1
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub address: ShippingAddress,
    #[validate(length(min = 1))]
    pub tel: String,
    #[validate(length(min = 1))]
    pub payment_token: String,
}
