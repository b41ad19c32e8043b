use crate::{
    entities::{
        cart_item, order,
        order::{OrderStatus, PaymentStatus},
        refund, CartItem, Order, User,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    mailer::Mailer,
    payments::PaymentGateway,
    services::inventory,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Cancellation coordinator: reverses a settled order.
///
/// Mirrors the checkout saga's shape with the phases inverted. One local
/// transaction flips the order to `cancelled`/`refund_started`, restores
/// stock and creates the refund row; the external refund call happens after
/// that commit. If the gateway call fails, the order deliberately stays in
/// `refund_started` — an observable inconsistency for the reconciliation job,
/// never reported to the client as success.
#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
}

impl CancellationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            mailer,
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<CancelOutcome, ServiceError> {
        // Step 1: local transaction — state flip, restock, refund row.
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "order belongs to another user".to_string(),
            ));
        }
        if order.order_status != OrderStatus::Received
            || order.payment_status != PaymentStatus::Successful
        {
            return Err(ServiceError::Forbidden(
                "order is not eligible for cancellation".to_string(),
            ));
        }

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(order.cart_id))
            .all(&txn)
            .await?;
        for item in &items {
            inventory::restock(&txn, item.product_id, item.quantity).await?;
        }

        let transaction_id = order.transaction_id.clone();
        let mut order_update: order::ActiveModel = order.into();
        order_update.order_status = Set(OrderStatus::Cancelled);
        order_update.payment_status = Set(PaymentStatus::RefundStarted);
        order_update.updated_at = Set(Utc::now());
        order_update.update(&txn).await?;

        // The gateway's refund id is unknown until it confirms.
        let refund_row = refund::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            user_id: Set(user_id),
            transaction_id: Set(transaction_id.clone()),
            refund_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::RefundStarted {
                order_id,
                refund_row: refund_row.id,
            })
            .await;
        info!(order_id = %order_id, "order cancelled; stock restored, refund started");

        // Step 2: external refund, outside the transaction. Refund issuance
        // is idempotent per charge reference, so the reconciliation job may
        // retry this safely.
        match self.gateway.refund(&transaction_id, order_id).await {
            Ok(receipt) => {
                // Step 3: best-effort reconciliation metadata; a failure here
                // does not block the client response.
                let mut refund_update: refund::ActiveModel = refund_row.into();
                refund_update.refund_id = Set(Some(receipt.refund_id.clone()));
                if let Err(e) = refund_update.update(&*self.db).await {
                    warn!(
                        order_id = %order_id,
                        "could not record gateway refund id {}: {}", receipt.refund_id, e
                    );
                }
                self.event_sender
                    .send_or_log(Event::RefundConfirmed {
                        order_id,
                        refund_id: receipt.refund_id,
                    })
                    .await;
            }
            Err(e) => {
                error!(
                    order_id = %order_id,
                    "refund dispatch failed; order left in refund_started for reconciliation: {}",
                    e
                );
                self.event_sender
                    .send_or_log(Event::RefundDispatchFailed { order_id })
                    .await;
                return Err(ServiceError::ExternalServiceError(
                    "refund could not be dispatched; the order remains marked for refund"
                        .to_string(),
                ));
            }
        }

        // Step 4: best-effort cancellation email.
        let cancellation_email_sent = match User::find_by_id(user_id).one(&*self.db).await {
            Ok(Some(user)) => {
                self.mailer
                    .send(
                        &user.email,
                        "Your order was cancelled",
                        &format!(
                            "Order {} has been cancelled and your refund is on its way.",
                            order_id
                        ),
                    )
                    .await
            }
            _ => false,
        };

        Ok(CancelOutcome {
            cancellation_email_sent,
        })
    }
}

/// Result of a cancellation call
#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    pub cancellation_email_sent: bool,
}
