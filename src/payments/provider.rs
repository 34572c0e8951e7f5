//! Seam to the third-party payment provider SDK.
//!
//! The real SDK lives in the embedding shell; the pipeline drives it through
//! these traits. The loaded handle is fetched once per process and reused
//! read-only across checkout attempts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Provider-side payment intent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentStatus {
    Created,
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Succeeded | IntentStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Card-level decline; the provider will decline it again unchanged
    CardDeclined,
    /// Provider wants an additional authentication step
    AuthenticationRequired,
    /// Form-level validation failure, confirmation was never requested
    InvalidForm,
    /// Transport failure talking to the provider
    Network,
    /// Any other provider API error
    Api,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Provider decline code when present, e.g. "insufficient_funds"
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(
        kind: ProviderErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

/// Caller-owned location the payment form mounts into.
#[derive(Debug, Clone)]
pub struct MountTarget(String);

impl MountTarget {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    pub fn selector(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ElementsAppearance {
    pub theme: String,
}

impl Default for ElementsAppearance {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
        }
    }
}

/// Parameters for the provider confirmation call.
#[derive(Debug, Clone)]
pub struct ConfirmParams {
    pub return_url: String,
    pub receipt_email: Option<String>,
}

/// Point-in-time view of a provider-side intent.
#[derive(Debug, Clone)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub amount_minor: i64,
    pub currency: String,
}

/// A mounted payment form instance. `submit` runs form-level validation only;
/// it never contacts the confirmation endpoint.
#[async_trait]
pub trait PaymentForm: Send + Sync {
    async fn mount(&self, target: &MountTarget) -> Result<(), ProviderError>;
    async fn submit(&self) -> Result<(), ProviderError>;
    async fn unmount(&self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ProviderSdk: Send + Sync {
    async fn create_payment_form(
        &self,
        client_secret: &str,
        appearance: &ElementsAppearance,
    ) -> Result<Arc<dyn PaymentForm>, ProviderError>;

    async fn confirm_payment(
        &self,
        form: Arc<dyn PaymentForm>,
        client_secret: &str,
        params: &ConfirmParams,
    ) -> Result<IntentSnapshot, ProviderError>;

    async fn retrieve_payment_intent(
        &self,
        client_secret: &str,
    ) -> Result<IntentSnapshot, ProviderError>;
}

/// Loads the provider SDK with the publishable key.
#[async_trait]
pub trait SdkFactory: Send + Sync {
    async fn load(&self, publishable_key: &str) -> Result<Arc<dyn ProviderSdk>, ProviderError>;
}

/// Caches the loaded SDK handle for the lifetime of the process. Concurrent
/// first calls race on a single initialization; later calls reuse the handle.
pub struct SdkLoader {
    factory: Arc<dyn SdkFactory>,
    publishable_key: String,
    handle: OnceCell<Arc<dyn ProviderSdk>>,
}

impl SdkLoader {
    pub fn new(factory: Arc<dyn SdkFactory>, publishable_key: impl Into<String>) -> Self {
        Self {
            factory,
            publishable_key: publishable_key.into(),
            handle: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn ProviderSdk>, ProviderError> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                debug!("loading provider SDK");
                self.factory.load(&self.publishable_key).await
            })
            .await?;
        Ok(Arc::clone(handle))
    }
}
