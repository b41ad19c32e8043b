use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{product, user},
    errors::ServiceError,
    events::{process_events, EventSender},
    handlers::AppServices,
    mailer::Mailer,
    payments::{Charge, ChargeRequest, PaymentGateway, RefundReceipt},
    services::checkout::{CheckoutInput, ShippingAddress},
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How the fake gateway behaves for the next calls.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum GatewayMode {
    /// Charge succeeds with `paid = true`; refunds succeed.
    Approve,
    /// Charge completes but the gateway reports `paid = false`.
    ApproveUnpaid,
    /// Charge is rejected by the gateway.
    Decline,
    /// Charge succeeds, but refund attempts error out.
    RefuseRefund,
}

/// In-process gateway double that records every call it sees.
pub struct RecordingGateway {
    pub mode: Mutex<GatewayMode>,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub refunds: Mutex<Vec<String>>,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self {
            mode: Mutex::new(GatewayMode::Approve),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl RecordingGateway {
    pub fn set_mode(&self, mode: GatewayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    pub fn recorded_idempotency_keys(&self) -> Vec<String> {
        self.charges
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.idempotency_key.clone())
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<Charge, ServiceError> {
        let mode = *self.mode.lock().unwrap();
        if matches!(mode, GatewayMode::Decline) {
            return Err(ServiceError::PaymentFailed("card declined".to_string()));
        }

        self.charges.lock().unwrap().push(request.clone());

        Ok(Charge {
            paid: !matches!(mode, GatewayMode::ApproveUnpaid),
            charge_id: format!("ch_{}", request.order_id.simple()),
            receipt_url: Some(format!(
                "https://pay.example/receipts/{}",
                request.order_id.simple()
            )),
        })
    }

    async fn refund(
        &self,
        charge_id: &str,
        _order_id: Uuid,
    ) -> Result<RefundReceipt, ServiceError> {
        let mode = *self.mode.lock().unwrap();
        if matches!(mode, GatewayMode::RefuseRefund) {
            return Err(ServiceError::ExternalServiceError(
                "refund rejected".to_string(),
            ));
        }

        self.refunds.lock().unwrap().push(charge_id.to_string());

        Ok(RefundReceipt {
            refund_id: format!("re_{}", Uuid::new_v4().simple()),
        })
    }
}

/// Mailer double: records messages, success is configurable.
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
    pub succeed: Mutex<bool>,
}

impl Default for RecordingMailer {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            succeed: Mutex::new(true),
        }
    }
}

#[allow(dead_code)]
impl RecordingMailer {
    pub fn fail_next_sends(&self) {
        *self.succeed.lock().unwrap() = false;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        *self.succeed.lock().unwrap()
    }
}

/// Test harness backed by a throwaway SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    pub mailer: Arc<RecordingMailer>,
    _tmp: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir for test database");
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            tmp.path().join("storefront_test.db").display()
        );

        let mut cfg = AppConfig::new(db_url, "127.0.0.1".to_string(), 18_080, "test".to_string());
        cfg.auto_migrate = true;
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(process_events(event_rx));

        let gateway = Arc::new(RecordingGateway::default());
        let mailer = Arc::new(RecordingMailer::default());

        let cfg = Arc::new(cfg);
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway.clone() as Arc<dyn PaymentGateway>,
            mailer.clone() as Arc<dyn Mailer>,
            cfg.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            gateway,
            mailer,
            _tmp: tmp,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test".to_string()),
            lastname: Set("User".to_string()),
            email: Set(email.to_string()),
            cart_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, quantity: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(format!("{} seeded for integration tests", name)),
            price: Set(price),
            currency: Set("inr".to_string()),
            quantity: Set(quantity),
            total_stars: Set(0),
            total_reviews: Set(0),
            average_review: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// The full HTTP surface, for request-level tests.
    #[allow(dead_code)]
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(self.state.clone())
    }

    /// Send a JSON request against the router.
    #[allow(dead_code)]
    pub async fn request(
        &self,
        method: http::Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        use tower::ServiceExt;

        let mut builder = http::Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            axum::body::Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            axum::body::Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// A checkout payload for the given user with a valid token and address.
    pub fn checkout_input(&self, user_id: Uuid) -> CheckoutInput {
        CheckoutInput {
            user_id,
            address: default_address(),
            tel: "+91-9999999999".to_string(),
            payment_token: "tok_visa".to_string(),
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn default_address() -> ShippingAddress {
    ShippingAddress {
        line1: "221B".to_string(),
        line2: None,
        landmark: Some("opposite park".to_string()),
        city: "Mumbai".to_string(),
        state: "MH".to_string(),
        zip: 400_001,
        country: "IN".to_string(),
        street: "Baker Street".to_string(),
    }
}
