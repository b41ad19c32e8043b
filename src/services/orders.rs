use crate::{
    entities::{
        order,
        order::{OrderStatus, PaymentStatus},
        Order, OrderModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order ledger queries and fulfilment transitions.
///
/// Orders are created and settled by the checkout coordinator and reversed by
/// the cancellation coordinator; this service only reads them and advances the
/// fulfilment dimension (`order_status`). It never touches `payment_status`.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Lists a user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderedAt)
            .all(&*self.db)
            .await?;

        Ok(orders)
    }

    /// Fetches one of the user's orders.
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "order belongs to another user".to_string(),
            ));
        }

        Ok(order)
    }

    /// Marks a paid, received order as dispatched.
    #[instrument(skip(self))]
    pub async fn mark_dispatched(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.transition(order_id, OrderStatus::Received, OrderStatus::Dispatched)
            .await
    }

    /// Marks a dispatched order as delivered.
    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.transition(order_id, OrderStatus::Dispatched, OrderStatus::Delivered)
            .await
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_status != PaymentStatus::Successful {
            return Err(ServiceError::Forbidden(
                "order has not been paid".to_string(),
            ));
        }
        if order.order_status != from {
            return Err(ServiceError::Conflict(format!(
                "order cannot move to {:?} from {:?}",
                to, order.order_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(to);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", from),
                new_status: format!("{:?}", to),
            })
            .await;

        info!(order_id = %order_id, "order status advanced to {:?}", to);
        Ok(updated)
    }
}
