use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::provider::IntentStatus;
use crate::{
    backend::StorefrontBackend,
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// A provisional payment authorization issued before any order exists.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAuthorization {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: IntentStatus,
}

/// Durable bridge between a cart and its authorization. Created when the
/// authorization is first issued; order fields are populated only after the
/// backend order exists ("linking").
#[derive(Debug, Clone, Serialize)]
pub struct CartPaymentMapping {
    pub cart_uuid: Uuid,
    pub payment_intent_id: String,
    pub amount_minor: i64,
    pub order_id: Option<Uuid>,
    pub order_code: Option<String>,
}

/// Creates, links, and tracks provisional payment authorizations.
///
/// At most one non-terminal authorization exists per `cart_uuid`; issuing a
/// new one supersedes the prior mapping rather than duplicating it. Every
/// mapping write is an upsert, so a double-clicked pay button cannot race two
/// inserts for one cart.
#[derive(Clone)]
pub struct PaymentIntentGateway {
    backend: Arc<dyn StorefrontBackend>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    mappings: Arc<DashMap<Uuid, CartPaymentMapping>>,
}

impl PaymentIntentGateway {
    pub fn new(
        backend: Arc<dyn StorefrontBackend>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            backend,
            event_sender,
            config,
            mappings: Arc::new(DashMap::new()),
        }
    }

    /// Converts a major-unit amount into provider minor units, rejecting
    /// amounts with sub-minor-unit residue.
    pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, ServiceError> {
        static ZERO_DECIMAL: Lazy<HashSet<&'static str>> =
            Lazy::new(|| HashSet::from(["JPY", "KRW", "VND"]));
        let exponent: u32 = if ZERO_DECIMAL.contains(currency.to_ascii_uppercase().as_str()) {
            0
        } else {
            2
        };
        let scaled = amount * Decimal::from(10_i64.pow(exponent));
        if scaled.fract() != Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Amount {} has sub-minor-unit precision for {}",
                amount, currency
            )));
        }
        scaled.to_i64().ok_or_else(|| {
            ServiceError::ValidationError(format!("Amount {} out of range", amount))
        })
    }

    /// Creates a provisional authorization against an estimated total.
    ///
    /// Totals below the configured minimum indicate a calculation bug and are
    /// rejected before the backend is contacted.
    #[instrument(skip(self))]
    pub async fn create_provisional(
        &self,
        amount: Decimal,
        currency: &str,
        cart_uuid: Uuid,
    ) -> Result<PaymentAuthorization, ServiceError> {
        if amount < self.config.minimum_charge {
            return Err(ServiceError::ValidationError(format!(
                "Estimated total {} {} is below the minimum chargeable amount",
                amount, currency
            )));
        }
        let amount_minor = Self::to_minor_units(amount, currency)?;

        let intent = self
            .backend
            .create_payment_intent(amount_minor, currency, cart_uuid)
            .await?;

        // A new authorization supersedes any prior mapping for this cart.
        self.mappings
            .entry(cart_uuid)
            .and_modify(|mapping| {
                mapping.payment_intent_id = intent.payment_intent_id.clone();
                mapping.amount_minor = amount_minor;
                mapping.order_id = None;
                mapping.order_code = None;
            })
            .or_insert_with(|| CartPaymentMapping {
                cart_uuid,
                payment_intent_id: intent.payment_intent_id.clone(),
                amount_minor,
                order_id: None,
                order_code: None,
            });

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                cart_uuid,
                payment_intent_id: intent.payment_intent_id.clone(),
            })
            .await;

        info!(
            "Created provisional authorization {} for cart {} ({} minor units)",
            intent.payment_intent_id, cart_uuid, amount_minor
        );
        Ok(PaymentAuthorization {
            id: intent.payment_intent_id,
            client_secret: intent.client_secret,
            amount_minor,
            currency: currency.to_string(),
            status: IntentStatus::Created,
        })
    }

    /// Ensures the backend mapping record exists. Idempotent; calling twice
    /// never creates two mappings for one cart.
    #[instrument(skip(self))]
    pub async fn create_mapping(&self, cart_uuid: Uuid) -> Result<(), ServiceError> {
        self.backend.create_cart_mapping(cart_uuid).await
    }

    /// Points the mapping at the given authorization. Idempotent upsert; a
    /// changed intent id clears any stale order binding.
    #[instrument(skip(self))]
    pub async fn update_mapping(
        &self,
        cart_uuid: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError> {
        self.backend
            .update_cart_mapping_payment_intent(cart_uuid, payment_intent_id)
            .await?;

        self.mappings
            .entry(cart_uuid)
            .and_modify(|mapping| {
                if mapping.payment_intent_id != payment_intent_id {
                    mapping.payment_intent_id = payment_intent_id.to_string();
                    mapping.order_id = None;
                    mapping.order_code = None;
                }
            })
            .or_insert_with(|| CartPaymentMapping {
                cart_uuid,
                payment_intent_id: payment_intent_id.to_string(),
                amount_minor: 0,
                order_id: None,
                order_code: None,
            });
        Ok(())
    }

    /// Binds the provisional authorization to the real order. Must be called
    /// exactly once per order and is a precondition for settlement; failure
    /// is terminal for the checkout attempt because an unlinked settlement
    /// cannot be attributed to an order.
    ///
    /// The authorized amount must equal the order's final total; a mismatch
    /// is a hard validation failure, never silently reconciled.
    #[instrument(skip(self, customer_email))]
    pub async fn link(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
        order_code: &str,
        final_amount: Decimal,
        customer_email: Option<&str>,
    ) -> Result<(), ServiceError> {
        let cart_uuid = self
            .mappings
            .iter()
            .find(|entry| entry.value().payment_intent_id == payment_intent_id)
            .map(|entry| *entry.key());

        if let Some(cart_uuid) = cart_uuid {
            let recorded = self.mappings.get(&cart_uuid).map(|m| m.clone());
            if let Some(mapping) = recorded {
                if mapping.order_id.is_some() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Authorization {} is already linked to an order",
                        payment_intent_id
                    )));
                }
                if mapping.amount_minor != 0 {
                    let final_minor = Self::to_minor_units(final_amount, &self.config.currency)?;
                    if mapping.amount_minor != final_minor {
                        return Err(ServiceError::ValidationError(format!(
                            "Authorized amount {} does not match order total {}",
                            mapping.amount_minor, final_minor
                        )));
                    }
                }
            }
        }

        let linked = self
            .backend
            .link_payment_intent_to_order(
                payment_intent_id,
                order_id,
                order_code,
                final_amount,
                customer_email,
            )
            .await?;
        if !linked {
            return Err(ServiceError::PaymentFailed(format!(
                "Backend refused to link authorization {} to order {}",
                payment_intent_id, order_code
            )));
        }

        if let Some(cart_uuid) = cart_uuid {
            self.mappings.entry(cart_uuid).and_modify(|mapping| {
                mapping.order_id = Some(order_id);
                mapping.order_code = Some(order_code.to_string());
            });
        }

        self.event_sender
            .send_or_log(Event::PaymentIntentLinked {
                payment_intent_id: payment_intent_id.to_string(),
                order_id,
            })
            .await;

        info!(
            "Linked authorization {} to order {} ({})",
            payment_intent_id, order_code, order_id
        );
        Ok(())
    }

    /// Current mapping for a cart, if an authorization has been issued.
    pub fn mapping_for(&self, cart_uuid: Uuid) -> Option<CartPaymentMapping> {
        self.mappings.get(&cart_uuid).map(|m| m.clone())
    }
}
