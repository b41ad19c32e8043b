pub mod carts;
pub mod common;
pub mod feedback;
pub mod orders;
pub mod products;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::mailer::Mailer;
use crate::payments::PaymentGateway;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<crate::services::catalog::CatalogService>,
    pub cart: Arc<crate::services::carts::CartService>,
    pub checkout: Arc<crate::services::checkout::CheckoutService>,
    pub cancellation: Arc<crate::services::cancellation::CancellationService>,
    pub orders: Arc<crate::services::orders::OrderService>,
    pub feedback: Arc<crate::services::feedback::FeedbackService>,
}

impl AppServices {
    /// Wire up every service against the shared pool, event channel and
    /// external collaborators.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        config: Arc<AppConfig>,
    ) -> Self {
        let catalog = Arc::new(crate::services::catalog::CatalogService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let cart = Arc::new(crate::services::carts::CartService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(crate::services::checkout::CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway.clone(),
            mailer.clone(),
            config,
        ));
        let cancellation = Arc::new(crate::services::cancellation::CancellationService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            mailer,
        ));
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let feedback = Arc::new(crate::services::feedback::FeedbackService::new(
            db_pool,
            event_sender,
        ));

        Self {
            catalog,
            cart,
            checkout,
            cancellation,
            orders,
            feedback,
        }
    }
}
