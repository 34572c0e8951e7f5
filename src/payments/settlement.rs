use std::{sync::Arc, time::Duration};

use metrics::counter;
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::classifier::{classify, FailureContext, PaymentError};
use crate::{
    backend::StorefrontBackend,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Terminal outcome of a settlement run. `attempts` always reflects the count
/// actually made, including the first.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub success: bool,
    pub order_id: Option<Uuid>,
    pub order_code: Option<String>,
    pub payment_record_id: Option<String>,
    pub attempts: u32,
    pub error: Option<PaymentError>,
}

/// Converts a confirmed client-side payment into durable backend order state.
///
/// Settlement is idempotent on the backend, keyed by the authorization id, so
/// concurrent callers all observe the same terminal outcome; this engine never
/// assumes it is the only caller and does not deduplicate.
#[derive(Clone)]
pub struct SettlementRetryEngine {
    backend: Arc<dyn StorefrontBackend>,
    event_sender: Arc<EventSender>,
}

impl SettlementRetryEngine {
    pub fn new(backend: Arc<dyn StorefrontBackend>, event_sender: Arc<EventSender>) -> Self {
        Self {
            backend,
            event_sender,
        }
    }

    /// Single settlement attempt.
    #[instrument(skip(self))]
    pub async fn settle(&self, payment_intent_id: &str) -> SettlementResult {
        self.retry_settlement(payment_intent_id, 1, Duration::ZERO)
            .await
    }

    /// Settlement with bounded retries and a fixed delay between attempts.
    ///
    /// Only failures classified `retryable = true` (transport failures, 5xx)
    /// are retried; backend declines and validation failures return after the
    /// attempt that produced them.
    #[instrument(skip(self))]
    pub async fn retry_settlement(
        &self,
        payment_intent_id: &str,
        max_attempts: u32,
        base_delay: Duration,
    ) -> SettlementResult {
        let max_attempts = max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            counter!("settlement_attempts_total", 1);

            match self.backend.settle_payment(payment_intent_id).await {
                Ok(outcome) if outcome.success => {
                    counter!("settlement_success_total", 1);
                    self.event_sender
                        .send_or_log(Event::SettlementSucceeded {
                            payment_intent_id: payment_intent_id.to_string(),
                            attempts,
                        })
                        .await;
                    info!(
                        "Settled payment intent {} after {} attempt(s)",
                        payment_intent_id, attempts
                    );
                    return SettlementResult {
                        success: true,
                        order_id: outcome.order_id,
                        order_code: outcome.order_code,
                        payment_record_id: outcome.payment_id,
                        attempts,
                        error: None,
                    };
                }
                Ok(outcome) => {
                    // The backend answered and declined; never retried.
                    let error = classify(
                        &ServiceError::PaymentFailed(
                            outcome
                                .message
                                .unwrap_or_else(|| "settlement declined".to_string()),
                        ),
                        FailureContext::Settlement,
                    );
                    return self.failed(payment_intent_id, attempts, error).await;
                }
                Err(ServiceError::NotFound(_)) => {
                    // Settlement-by-intent unavailable on this backend; fall
                    // back to recording the payment against the order.
                    warn!(
                        "settlement endpoint unavailable for {}; using add-payment fallback",
                        payment_intent_id
                    );
                    match self
                        .backend
                        .add_payment_to_order(
                            "card",
                            json!({ "payment_intent_id": payment_intent_id }),
                        )
                        .await
                    {
                        Ok(()) => {
                            counter!("settlement_success_total", 1);
                            self.event_sender
                                .send_or_log(Event::SettlementSucceeded {
                                    payment_intent_id: payment_intent_id.to_string(),
                                    attempts,
                                })
                                .await;
                            return SettlementResult {
                                success: true,
                                order_id: None,
                                order_code: None,
                                payment_record_id: None,
                                attempts,
                                error: None,
                            };
                        }
                        Err(err) => {
                            let error = classify(&err, FailureContext::Settlement);
                            return self.failed(payment_intent_id, attempts, error).await;
                        }
                    }
                }
                Err(err) => {
                    let classified = classify(&err, FailureContext::Settlement);
                    if classified.retryable && attempts < max_attempts {
                        warn!(
                            "Settlement attempt {}/{} for {} failed: {}; retrying",
                            attempts, max_attempts, payment_intent_id, err
                        );
                        sleep(base_delay).await;
                        continue;
                    }
                    return self.failed(payment_intent_id, attempts, classified).await;
                }
            }
        }
    }

    async fn failed(
        &self,
        payment_intent_id: &str,
        attempts: u32,
        error: PaymentError,
    ) -> SettlementResult {
        counter!("settlement_failures_total", 1);
        self.event_sender
            .send_or_log(Event::SettlementFailed {
                payment_intent_id: payment_intent_id.to_string(),
                attempts,
            })
            .await;
        warn!(
            "Settlement for {} failed after {} attempt(s): {}",
            payment_intent_id, attempts, error.message
        );
        SettlementResult {
            success: false,
            order_id: None,
            order_code: None,
            payment_record_id: None,
            attempts,
            error: Some(error),
        }
    }
}
