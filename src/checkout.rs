use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    backend::StorefrontBackend,
    cart::{
        pricing::{estimate_total, TotalEstimate},
        CartSession, LocalCartStore,
    },
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{
        classifier::{classify, ErrorSeverity, FailureContext, PaymentError},
        element::PaymentElementController,
        gateway::PaymentIntentGateway,
        provider::{ConfirmParams, MountTarget, SdkLoader},
        settlement::SettlementRetryEngine,
        PaymentReceipt,
    },
};

/// External collaborator that creates the backend order from the cart. The
/// order is created between authorization and linking; the pipeline only
/// consumes its reference.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(
        &self,
        cart: &CartSession,
        estimate: &TotalEstimate,
    ) -> Result<OrderRef, ServiceError>;
}

/// Reference to a backend order created from the cart.
#[derive(Debug, Clone)]
pub struct OrderRef {
    pub order_id: Uuid,
    pub order_code: String,
    pub final_total: Decimal,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSuccess {
    pub order_id: Uuid,
    pub order_code: String,
    pub payment_record_id: Option<String>,
    pub settlement_attempts: u32,
}

/// Cloneable handle that aborts the in-flight checkout at the next step
/// boundary. Aborting tears the payment element down instead of leaving a
/// partially-mounted form behind.
#[derive(Clone, Default)]
pub struct CheckoutAbort(Arc<AtomicBool>);

impl CheckoutAbort {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sequences the settlement pipeline:
/// estimate → authorize → (order created) → link → confirm → settle → clear.
///
/// Steps within an attempt are strictly sequential via explicit awaiting. On
/// failure the cart and the provisional authorization are left intact so the
/// user can retry without re-entering payment details; a retry re-runs the
/// whole sequence, which issues a fresh authorization (a declined provider
/// intent carries its failed state forward) and a fresh element controller.
pub struct CheckoutOrchestrator {
    cart: Arc<LocalCartStore>,
    gateway: Arc<PaymentIntentGateway>,
    settlement: Arc<SettlementRetryEngine>,
    sdk: Arc<SdkLoader>,
    backend: Arc<dyn StorefrontBackend>,
    order_placer: Arc<dyn OrderPlacer>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    abort: CheckoutAbort,
    receipt: RwLock<Option<PaymentReceipt>>,
}

impl CheckoutOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cart: Arc<LocalCartStore>,
        gateway: Arc<PaymentIntentGateway>,
        settlement: Arc<SettlementRetryEngine>,
        sdk: Arc<SdkLoader>,
        backend: Arc<dyn StorefrontBackend>,
        order_placer: Arc<dyn OrderPlacer>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            cart,
            gateway,
            settlement,
            sdk,
            backend,
            order_placer,
            event_sender,
            config,
            abort: CheckoutAbort::default(),
            receipt: RwLock::new(None),
        }
    }

    /// Handle for cancelling the current attempt (e.g. on view teardown).
    pub fn abort_handle(&self) -> CheckoutAbort {
        self.abort.clone()
    }

    /// Last successful settlement, for the confirmation view.
    pub async fn last_receipt(&self) -> Option<PaymentReceipt> {
        self.receipt.read().await.clone()
    }

    /// Runs one full checkout attempt. The single entry point for the UI
    /// layer.
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        country_code: &str,
        mount: MountTarget,
    ) -> Result<CheckoutSuccess, PaymentError> {
        self.abort.reset();
        let result = self.run_attempt(country_code, mount).await;
        if let Err(err) = &result {
            if let Ok(Some(cart)) = self.cart.snapshot() {
                self.event_sender
                    .send_or_log(Event::CheckoutFailed {
                        cart_uuid: cart.cart_uuid,
                    })
                    .await;
            }
            warn!("Checkout failed: {} ({:?})", err.message, err.category);
        }
        result
    }

    async fn run_attempt(
        &self,
        country_code: &str,
        mount: MountTarget,
    ) -> Result<CheckoutSuccess, PaymentError> {
        // Cart must be non-empty.
        let cart = self
            .cart
            .snapshot()
            .map_err(|e| classify(&e, FailureContext::CartValidation))?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                classify(
                    &ServiceError::ValidationError("Cart is empty".to_string()),
                    FailureContext::CartValidation,
                )
            })?;

        // Stock is never locked client-side; re-validate against live stock.
        let lines: Vec<(Uuid, u32)> = cart
            .items
            .iter()
            .map(|item| (item.variant_id, item.quantity))
            .collect();
        let shortages = self
            .backend
            .verify_stock(&lines)
            .await
            .map_err(|e| classify(&e, FailureContext::CartValidation))?;
        if !shortages.is_empty() {
            return Err(classify(
                &ServiceError::ValidationError(format!(
                    "{} cart line(s) exceed available stock",
                    shortages.len()
                )),
                FailureContext::CartValidation,
            ));
        }

        self.ensure_live(None).await?;

        // Estimate and authorize against the estimated total.
        let estimate = estimate_total(
            &cart.items,
            cart.applied_coupon.as_ref(),
            country_code,
            self.config.free_shipping,
        );
        let authorization = self
            .gateway
            .create_provisional(estimate.total, &cart.currency, cart.cart_uuid)
            .await
            .map_err(|e| classify(&e, FailureContext::IntentCreation))?;
        self.gateway
            .create_mapping(cart.cart_uuid)
            .await
            .map_err(|e| classify(&e, FailureContext::IntentCreation))?;
        self.gateway
            .update_mapping(cart.cart_uuid, &authorization.id)
            .await
            .map_err(|e| classify(&e, FailureContext::IntentCreation))?;

        self.ensure_live(None).await?;

        // External collaborator creates the real order from the cart.
        let order = self
            .order_placer
            .place_order(&cart, &estimate)
            .await
            .map_err(|e| classify(&e, FailureContext::IntentCreation))?;

        self.ensure_live(None).await?;

        // Linking must precede confirmation; failure is terminal for this
        // attempt.
        self.gateway
            .link(
                &authorization.id,
                order.order_id,
                &order.order_code,
                order.final_total,
                order.customer_email.as_deref(),
            )
            .await
            .map_err(|e| classify(&e, FailureContext::Linking))?;

        // Fresh controller per attempt; the SDK handle itself is cached.
        let sdk = self.sdk.get().await.map_err(|e| {
            let raw: ServiceError = e.into();
            classify(&raw, FailureContext::Confirmation)
        })?;
        let mut controller = PaymentElementController::new(sdk, mount);
        if let Err(err) = controller.initialize(&authorization.client_secret).await {
            controller.teardown().await;
            return Err(classify(&err, FailureContext::Confirmation));
        }
        if let Err(err) = self.ensure_live(Some(&mut controller)).await {
            return Err(err);
        }

        let confirm_params = ConfirmParams {
            return_url: self.config.return_url.clone(),
            receipt_email: order.customer_email.clone(),
        };
        let snapshot = match controller.confirm(&confirm_params).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                controller.teardown().await;
                return Err(err);
            }
        };

        if let Err(err) = self.ensure_live(Some(&mut controller)).await {
            return Err(err);
        }

        // Confirmation must precede settlement.
        let result = self
            .settlement
            .retry_settlement(
                &snapshot.id,
                self.config.settlement_max_attempts,
                Duration::from_millis(self.config.settlement_base_delay_ms),
            )
            .await;
        controller.teardown().await;

        if !result.success {
            let error = result.error.unwrap_or_else(|| {
                classify(
                    &ServiceError::InternalError(
                        "settlement failed without a classified error".to_string(),
                    ),
                    FailureContext::Settlement,
                )
            });
            return Err(error);
        }

        // Success: destroy the cart session and cache the receipt. A failed
        // clear is logged, never surfaced; the payment is already settled.
        if let Err(err) = self.cart.clear().await {
            warn!("Cart clear after settlement failed: {}", err);
        }

        let order_id = result.order_id.unwrap_or(order.order_id);
        let order_code = result
            .order_code
            .clone()
            .unwrap_or_else(|| order.order_code.clone());
        *self.receipt.write().await = Some(PaymentReceipt {
            order_id,
            order_code: order_code.clone(),
            amount: order.final_total,
            currency: cart.currency.clone(),
            completed_at: Utc::now(),
        });
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                cart_uuid: cart.cart_uuid,
                order_code: order_code.clone(),
            })
            .await;

        info!(
            "Checkout completed: order {} settled in {} attempt(s)",
            order_code, result.attempts
        );
        Ok(CheckoutSuccess {
            order_id,
            order_code,
            payment_record_id: result.payment_record_id,
            settlement_attempts: result.attempts,
        })
    }

    /// Abort check at a step boundary. Tears the element down so nothing is
    /// left mounted into a detached view.
    async fn ensure_live(
        &self,
        controller: Option<&mut PaymentElementController>,
    ) -> Result<(), PaymentError> {
        if !self.abort.is_aborted() {
            return Ok(());
        }
        if let Some(controller) = controller {
            controller.teardown().await;
        }
        Err(PaymentError::system(
            "Checkout was cancelled.",
            ErrorSeverity::Low,
            true,
            "Start the checkout again when you are ready.",
        ))
    }
}
