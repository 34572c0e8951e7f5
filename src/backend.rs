use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Provisional intent issued by the backend before any order exists.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionalIntent {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// Outcome of a settlement call. `success = false` with a message means the
/// backend answered but declined the settlement; transport failures surface as
/// `ServiceError` instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettlementOutcome {
    pub success: bool,
    pub order_id: Option<Uuid>,
    pub order_code: Option<String>,
    pub payment_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A cart line that cannot be fulfilled at its requested quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockShortage {
    pub variant_id: Uuid,
    pub requested: u32,
    pub available: u32,
}

/// Backend mutations the settlement pipeline consumes.
///
/// Settlement is idempotent on the backend, keyed by `payment_intent_id`:
/// repeated or concurrent `settle_payment` calls for the same id observe the
/// same terminal outcome and never create duplicate payment records. The
/// client relies on that contract and does not deduplicate callers itself.
#[async_trait]
pub trait StorefrontBackend: Send + Sync {
    /// Creates a provisional payment intent against an estimated total,
    /// correlated to the cart by `cart_uuid`.
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        cart_uuid: Uuid,
    ) -> Result<ProvisionalIntent, ServiceError>;

    /// Idempotent upsert of the cart↔payment mapping record.
    async fn create_cart_mapping(&self, cart_uuid: Uuid) -> Result<(), ServiceError>;

    /// Idempotent update of the mapping's current payment intent.
    async fn update_cart_mapping_payment_intent(
        &self,
        cart_uuid: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError>;

    /// Binds a provisional intent to a concrete order. Returns `false` when
    /// the backend refuses the link.
    async fn link_payment_intent_to_order(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
        order_code: &str,
        final_total: Decimal,
        customer_email: Option<&str>,
    ) -> Result<bool, ServiceError>;

    /// Durably records the confirmed payment against the linked order.
    async fn settle_payment(&self, payment_intent_id: &str)
        -> Result<SettlementOutcome, ServiceError>;

    /// Fallback path when settlement-by-intent is unavailable.
    async fn add_payment_to_order(
        &self,
        method: &str,
        metadata: serde_json::Value,
    ) -> Result<(), ServiceError>;

    /// Re-validates cart lines against live stock. Returns the lines that
    /// exceed availability; empty means the cart is fulfillable.
    async fn verify_stock(&self, lines: &[(Uuid, u32)]) -> Result<Vec<StockShortage>, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    linked: bool,
}

/// HTTP client for the storefront backend API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            400 | 422 => ServiceError::ValidationError(body),
            402 => ServiceError::PaymentFailed(body),
            404 => ServiceError::NotFound(body),
            // 5xx is transport-class and retryable
            s if status.is_server_error() => {
                ServiceError::NetworkError(format!("backend returned {}: {}", s, body))
            }
            s => ServiceError::ExternalServiceError(format!("backend returned {}: {}", s, body)),
        })
    }
}

#[async_trait]
impl StorefrontBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        cart_uuid: Uuid,
    ) -> Result<ProvisionalIntent, ServiceError> {
        let response = self
            .client
            .post(self.url("/payments/intents"))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "cart_uuid": cart_uuid,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json::<ProvisionalIntent>().await?)
    }

    #[instrument(skip(self))]
    async fn create_cart_mapping(&self, cart_uuid: Uuid) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(self.url("/payments/mappings"))
            .json(&json!({ "cart_uuid": cart_uuid }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_cart_mapping_payment_intent(
        &self,
        cart_uuid: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError> {
        let response = self
            .client
            .put(self.url(&format!("/payments/mappings/{}", cart_uuid)))
            .json(&json!({ "payment_intent_id": payment_intent_id }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, customer_email))]
    async fn link_payment_intent_to_order(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
        order_code: &str,
        final_total: Decimal,
        customer_email: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let response = self
            .client
            .post(self.url(&format!("/payments/intents/{}/link", payment_intent_id)))
            .json(&json!({
                "order_id": order_id,
                "order_code": order_code,
                "final_total": final_total,
                "customer_email": customer_email,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json::<LinkResponse>().await?.linked)
    }

    #[instrument(skip(self))]
    async fn settle_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<SettlementOutcome, ServiceError> {
        let response = self
            .client
            .post(self.url(&format!("/payments/intents/{}/settle", payment_intent_id)))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json::<SettlementOutcome>().await?)
    }

    #[instrument(skip(self, metadata))]
    async fn add_payment_to_order(
        &self,
        method: &str,
        metadata: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(self.url("/orders/payments"))
            .json(&json!({ "method": method, "metadata": metadata }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn verify_stock(
        &self,
        lines: &[(Uuid, u32)],
    ) -> Result<Vec<StockShortage>, ServiceError> {
        let payload: Vec<_> = lines
            .iter()
            .map(|(variant_id, quantity)| json!({ "variant_id": variant_id, "quantity": quantity }))
            .collect();
        let response = self
            .client
            .post(self.url("/inventory/verify"))
            .json(&json!({ "lines": payload }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json::<Vec<StockShortage>>().await?)
    }
}
