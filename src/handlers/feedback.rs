use crate::handlers::common::{map_service_error, no_content_response, success_response, validate_input};
use crate::{errors::ApiError, services::feedback::SubmitFeedbackInput, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for product feedback endpoints
pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_feedback))
        .route("/product/:product_id", get(list_feedback))
        .route("/product/:product_id", delete(remove_feedback))
}

/// Submit or update a review for a purchased product
async fn submit_feedback(
    State(state): State<AppState>,
    Json(payload): Json<SubmitFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    state
        .services
        .feedback
        .submit(SubmitFeedbackInput {
            user_id: payload.user_id,
            product_id: payload.product_id,
            stars: payload.stars,
            comment: payload.comment,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "message": "Done!" })))
}

/// List a product's reviews
async fn list_feedback(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let feedback = state
        .services
        .feedback
        .list_for_product(product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "feedbacks": feedback })))
}

/// Remove the user's review of a product
async fn remove_feedback(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<RemoveFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .feedback
        .remove(payload.user_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitFeedbackRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5))]
    pub stars: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveFeedbackRequest {
    pub user_id: Uuid,
}
