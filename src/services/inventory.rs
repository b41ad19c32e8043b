//! Guarded stock mutation helpers shared by checkout and cancellation.
//!
//! Every decrement is a single `UPDATE … SET quantity = quantity - n WHERE id
//! = ? AND quantity >= n`, so the availability check and the decrement are
//! atomic per product row regardless of how many checkouts race. Increments
//! (restock on cancellation) are unconditional.

use crate::entities::{product, Product};
use crate::errors::ServiceError;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

/// Atomically take `quantity` units of a product's stock, failing without any
/// change if that would drive the on-hand count negative.
pub async fn take_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = Product::update_many()
        .col_expr(
            product::Column::Quantity,
            Expr::col(product::Column::Quantity).sub(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        // Distinguish a missing product from a stock shortfall.
        let exists = Product::find_by_id(product_id).one(conn).await?.is_some();
        return if exists {
            Err(ServiceError::InsufficientStock(format!(
                "product {} is not available in the requested quantity",
                product_id
            )))
        } else {
            Err(ServiceError::NotFound(format!(
                "product {} not found",
                product_id
            )))
        };
    }

    Ok(())
}

/// Return `quantity` units of a product to stock. Always safe.
pub async fn restock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = Product::update_many()
        .col_expr(
            product::Column::Quantity,
            Expr::col(product::Column::Quantity).add(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "product {} not found",
            product_id
        )));
    }

    Ok(())
}

/// Read-only availability check used during reservation. The authoritative
/// guard is the one inside [`take_stock`]; this one exists so the reservation
/// transaction can reject a doomed checkout before creating an order row.
pub fn ensure_available(product: &product::Model, requested: i32) -> Result<(), ServiceError> {
    if product.quantity - requested < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "{} is no longer available in the requested quantity",
            product.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product_with_stock(quantity: i32) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Widget".into(),
            description: "A widget".into(),
            price: dec!(5.00),
            currency: "inr".into(),
            quantity,
            total_stars: 0,
            total_reviews: 0,
            average_review: dec!(0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ensure_available_accepts_exact_stock() {
        let product = product_with_stock(3);
        assert!(ensure_available(&product, 3).is_ok());
    }

    #[test]
    fn ensure_available_rejects_shortfall() {
        let product = product_with_stock(2);
        let err = ensure_available(&product, 3).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn ensure_available_accepts_zero_request() {
        let product = product_with_stock(0);
        assert!(ensure_available(&product, 0).is_ok());
    }
}
