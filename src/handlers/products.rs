use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginationParams,
};
use crate::{
    errors::ApiError,
    services::catalog::{CreateProductInput, ProductPage, UpdateProductInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for catalog endpoints
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/", post(create_product))
        .route("/:id", get(get_product))
        .route("/:id", put(update_product))
}

/// List products with pagination
async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (products, total) = state
        .services
        .catalog
        .list_products(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ProductPage {
        products,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
    }))
}

/// Get a single product
async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

/// Create a product
async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let product = state
        .services
        .catalog
        .create_product(CreateProductInput {
            name: payload.name,
            description: payload.description,
            price: payload.price,
            currency: payload.currency,
            quantity: payload.quantity,
        })
        .await
        .map_err(map_service_error)?;

    Ok(created_response(product))
}

/// Update a product
async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .update_product(
            id,
            UpdateProductInput {
                name: payload.name,
                description: payload.description,
                price: payload.price,
                quantity: payload.quantity,
            },
        )
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub price: Decimal,
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<i32>,
}
