use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{
    classifier::{classify, FailureContext, PaymentError},
    provider::{
        ConfirmParams, ElementsAppearance, IntentSnapshot, IntentStatus, MountTarget, PaymentForm,
        ProviderSdk,
    },
};
use crate::errors::ServiceError;

/// Lifecycle phases of a payment element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementPhase {
    Uninitialized,
    Loading,
    Ready,
    Submitting,
    Confirmed,
    Failed,
}

/// Owns one payment form from mount to teardown.
///
/// One controller serves exactly one checkout attempt: a `Confirmed` or
/// `Failed` controller is never reused, because the provider element carries
/// forward internal state from the previous confirmation. Retries create a
/// fresh controller, and the prior one must be torn down before a new form is
/// mounted into the same target.
pub struct PaymentElementController {
    sdk: Arc<dyn ProviderSdk>,
    mount: MountTarget,
    appearance: ElementsAppearance,
    phase: ElementPhase,
    client_secret: Option<String>,
    form: Option<Arc<dyn PaymentForm>>,
}

impl PaymentElementController {
    pub fn new(sdk: Arc<dyn ProviderSdk>, mount: MountTarget) -> Self {
        Self {
            sdk,
            mount,
            appearance: ElementsAppearance::default(),
            phase: ElementPhase::Uninitialized,
            client_secret: None,
            form: None,
        }
    }

    pub fn with_appearance(mut self, appearance: ElementsAppearance) -> Self {
        self.appearance = appearance;
        self
    }

    pub fn phase(&self) -> ElementPhase {
        self.phase
    }

    /// Creates the payment form for the given client secret and mounts it
    /// into the caller-owned target.
    #[instrument(skip(self, client_secret))]
    pub async fn initialize(&mut self, client_secret: &str) -> Result<(), ServiceError> {
        if self.phase != ElementPhase::Uninitialized {
            return Err(ServiceError::InvalidOperation(
                "Payment element already initialized; create a new controller per attempt"
                    .to_string(),
            ));
        }
        self.phase = ElementPhase::Loading;

        let form = match self
            .sdk
            .create_payment_form(client_secret, &self.appearance)
            .await
        {
            Ok(form) => form,
            Err(err) => {
                self.phase = ElementPhase::Failed;
                return Err(err.into());
            }
        };
        if let Err(err) = form.mount(&self.mount).await {
            self.phase = ElementPhase::Failed;
            return Err(err.into());
        }

        self.client_secret = Some(client_secret.to_string());
        self.form = Some(form);
        self.phase = ElementPhase::Ready;
        debug!("payment element mounted at {}", self.mount.selector());
        Ok(())
    }

    /// Validates the form, then requests provider confirmation.
    ///
    /// A form-level validation failure never contacts the confirmation
    /// endpoint. Of the provider statuses only `Succeeded` is client-side
    /// success; `RequiresAction` and `Processing` fail retryably with
    /// distinct messages.
    #[instrument(skip(self, params))]
    pub async fn confirm(&mut self, params: &ConfirmParams) -> Result<IntentSnapshot, PaymentError> {
        if self.phase == ElementPhase::Confirmed {
            return Err(classify(
                &ServiceError::InvalidOperation(
                    "Payment already confirmed; start a new checkout attempt".to_string(),
                ),
                FailureContext::Confirmation,
            ));
        }
        let (form, client_secret) = match (&self.form, &self.client_secret) {
            (Some(form), Some(secret)) if self.phase == ElementPhase::Ready => {
                (Arc::clone(form), secret.clone())
            }
            _ => {
                return Err(classify(
                    &ServiceError::InvalidOperation("Payment form is not ready".to_string()),
                    FailureContext::Confirmation,
                ));
            }
        };
        self.phase = ElementPhase::Submitting;

        if let Err(err) = form.submit().await {
            self.phase = ElementPhase::Failed;
            return Err(classify(
                &ServiceError::ProviderError(err),
                FailureContext::Confirmation,
            ));
        }

        let snapshot = match self
            .sdk
            .confirm_payment(form, &client_secret, params)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.phase = ElementPhase::Failed;
                let raw: ServiceError = err.into();
                return Err(classify(&raw, FailureContext::Confirmation));
            }
        };

        match snapshot.status {
            IntentStatus::Succeeded => {
                self.phase = ElementPhase::Confirmed;
                info!("payment intent {} confirmed", snapshot.id);
                Ok(snapshot)
            }
            IntentStatus::RequiresAction => {
                self.phase = ElementPhase::Failed;
                Err(PaymentError::provider(
                    "Additional authentication is required to complete this payment.",
                    true,
                    "Complete the verification step and try again.",
                ))
            }
            IntentStatus::Created | IntentStatus::Processing => {
                self.phase = ElementPhase::Failed;
                Err(PaymentError::provider(
                    "Your payment is still processing.",
                    true,
                    "Wait a moment and try again.",
                ))
            }
            IntentStatus::Failed => {
                self.phase = ElementPhase::Failed;
                Err(classify(
                    &ServiceError::PaymentFailed(format!(
                        "provider reported intent {} as failed",
                        snapshot.id
                    )),
                    FailureContext::Confirmation,
                ))
            }
        }
    }

    /// Queries the provider for the intent's current status. Useful after a
    /// `Processing` outcome, when the client-side result lags the provider.
    pub async fn remote_status(&self) -> Result<IntentSnapshot, ServiceError> {
        let secret = self.client_secret.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("Payment element has no intent yet".to_string())
        })?;
        Ok(self.sdk.retrieve_payment_intent(secret).await?)
    }

    /// Unmounts the provider element. Must run before the mount target is
    /// reused or removed; safe to call more than once.
    pub async fn teardown(&mut self) {
        if let Some(form) = self.form.take() {
            if let Err(err) = form.unmount().await {
                warn!("failed to unmount payment element: {}", err);
            }
        }
    }
}

impl Drop for PaymentElementController {
    fn drop(&mut self) {
        if self.form.is_some() {
            warn!(
                "payment element controller dropped while mounted at {}; teardown() should run before the mount point is reused",
                self.mount.selector()
            );
        }
    }
}
