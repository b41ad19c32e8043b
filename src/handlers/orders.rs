use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/dispatch", post(mark_dispatched))
        .route("/:id/deliver", post(mark_delivered))
}

/// List the user's orders
async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_for_user(params.user_id)
        .await
        .map_err(map_service_error)?;

    if orders.is_empty() {
        return Err(ApiError::NotFound("no orders found".to_string()));
    }

    Ok(success_response(serde_json::json!({ "orders": orders })))
}

/// Get one of the user's orders
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_for_user(params.user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Cancel a received, paid order and start its refund
async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .cancellation
        .cancel(payload.user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Order cancelled",
        "cancellation_email_sent": outcome.cancellation_email_sent,
    })))
}

/// Mark an order dispatched (operations)
async fn mark_dispatched(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .mark_dispatched(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Mark an order delivered (operations)
async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .mark_delivered(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub user_id: Uuid,
}
