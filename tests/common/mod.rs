//! Shared mocks and fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_checkout::{
    backend::{ProvisionalIntent, SettlementOutcome, StockShortage, StorefrontBackend},
    cart::{pricing::TotalEstimate, storage::InMemoryStorage, CartItem, CartSession},
    checkout::{OrderPlacer, OrderRef},
    config::AppConfig,
    errors::ServiceError,
    events::Event,
    payments::provider::{
        ConfirmParams, ElementsAppearance, IntentSnapshot, IntentStatus, MountTarget, PaymentForm,
        ProviderError, ProviderErrorKind, ProviderSdk, SdkFactory,
    },
    CheckoutStack,
};

// ==================== Backend Mock ====================

/// In-memory storefront backend honoring the idempotent-settlement contract:
/// the first terminal settlement outcome per intent id is memoized and
/// returned to every subsequent caller.
#[derive(Default)]
pub struct MockBackend {
    pub intents_created: AtomicU32,
    pub link_calls: AtomicU32,
    pub settle_calls: AtomicU32,
    pub payments_added: AtomicU32,
    /// Number of leading settle attempts that fail with a transport error.
    pub settle_failures: AtomicU32,
    /// Backend answers but declines every settlement.
    pub settle_decline: AtomicBool,
    /// Settlement-by-intent endpoint is absent (404).
    pub settle_unavailable: AtomicBool,
    /// Backend refuses the intent-to-order link.
    pub refuse_link: AtomicBool,
    /// Cart mapping records, keyed by cart uuid.
    pub mappings: Mutex<HashMap<Uuid, String>>,
    /// Linked orders, keyed by payment intent id.
    pub linked: Mutex<HashMap<String, (Uuid, String)>>,
    /// Memoized terminal settlement outcomes, keyed by payment intent id.
    pub settled: Mutex<HashMap<String, SettlementOutcome>>,
    /// Shortages returned from stock verification.
    pub shortages: Mutex<Vec<StockShortage>>,
}

impl MockBackend {
    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }

    pub fn mapped_intent(&self, cart_uuid: Uuid) -> Option<String> {
        self.mappings.lock().unwrap().get(&cart_uuid).cloned()
    }
}

#[async_trait]
impl StorefrontBackend for MockBackend {
    async fn create_payment_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _cart_uuid: Uuid,
    ) -> Result<ProvisionalIntent, ServiceError> {
        let n = self.intents_created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("pi_{}", n);
        Ok(ProvisionalIntent {
            client_secret: format!("cs_{}", id),
            payment_intent_id: id,
        })
    }

    async fn create_cart_mapping(&self, cart_uuid: Uuid) -> Result<(), ServiceError> {
        self.mappings
            .lock()
            .unwrap()
            .entry(cart_uuid)
            .or_insert_with(String::new);
        Ok(())
    }

    async fn update_cart_mapping_payment_intent(
        &self,
        cart_uuid: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError> {
        self.mappings
            .lock()
            .unwrap()
            .insert(cart_uuid, payment_intent_id.to_string());
        Ok(())
    }

    async fn link_payment_intent_to_order(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
        order_code: &str,
        _final_total: Decimal,
        _customer_email: Option<&str>,
    ) -> Result<bool, ServiceError> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_link.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.linked.lock().unwrap().insert(
            payment_intent_id.to_string(),
            (order_id, order_code.to_string()),
        );
        Ok(true)
    }

    async fn settle_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<SettlementOutcome, ServiceError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);

        if self.settle_unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::NotFound(
                "settlement endpoint not found".to_string(),
            ));
        }

        // Burn down the scripted transport failures first.
        let remaining = self.settle_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.settle_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ServiceError::NetworkError("connection reset".to_string()));
        }

        let mut settled = self.settled.lock().unwrap();
        if let Some(outcome) = settled.get(payment_intent_id) {
            return Ok(outcome.clone());
        }

        let outcome = if self.settle_decline.load(Ordering::SeqCst) {
            SettlementOutcome {
                success: false,
                message: Some("payment could not be captured".to_string()),
                ..SettlementOutcome::default()
            }
        } else {
            let (order_id, order_code) = self
                .linked
                .lock()
                .unwrap()
                .get(payment_intent_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(format!(
                        "intent {} settled before linking",
                        payment_intent_id
                    ))
                })?;
            SettlementOutcome {
                success: true,
                order_id: Some(order_id),
                order_code: Some(order_code),
                payment_id: Some(format!("pay_{}", payment_intent_id)),
                message: None,
            }
        };
        settled.insert(payment_intent_id.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn add_payment_to_order(
        &self,
        _method: &str,
        _metadata: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.payments_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn verify_stock(
        &self,
        _lines: &[(Uuid, u32)],
    ) -> Result<Vec<StockShortage>, ServiceError> {
        Ok(self.shortages.lock().unwrap().clone())
    }
}

// ==================== Provider SDK Mock ====================

/// Next scripted confirmation outcome. Defaults to `Succeed` when the script
/// runs dry.
#[derive(Debug, Clone, Copy)]
pub enum ConfirmScript {
    Succeed,
    RequiresAction,
    Declined,
    FailTransport,
}

#[derive(Default)]
pub struct MockSdk {
    pub submit_invalid: AtomicBool,
    pub confirm_script: Mutex<VecDeque<ConfirmScript>>,
    pub confirm_calls: AtomicU32,
    pub forms_created: AtomicU32,
    /// Net mount count; zero means every mounted form was unmounted.
    pub mounted_now: AtomicI32,
}

impl MockSdk {
    pub fn script(&self, outcomes: &[ConfirmScript]) {
        self.confirm_script
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
    }
}

pub struct MockForm {
    invalid: bool,
    mounted_now: Arc<AtomicI32>,
}

#[async_trait]
impl PaymentForm for MockForm {
    async fn mount(&self, _target: &MountTarget) -> Result<(), ProviderError> {
        self.mounted_now.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn submit(&self) -> Result<(), ProviderError> {
        if self.invalid {
            Err(ProviderError::new(
                ProviderErrorKind::InvalidForm,
                "incomplete card number",
            ))
        } else {
            Ok(())
        }
    }

    async fn unmount(&self) -> Result<(), ProviderError> {
        self.mounted_now.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSdkHandle {
    sdk: Arc<MockSdk>,
    mounted_now: Arc<AtomicI32>,
}

#[async_trait]
impl ProviderSdk for MockSdkHandle {
    async fn create_payment_form(
        &self,
        _client_secret: &str,
        _appearance: &ElementsAppearance,
    ) -> Result<Arc<dyn PaymentForm>, ProviderError> {
        self.sdk.forms_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockForm {
            invalid: self.sdk.submit_invalid.load(Ordering::SeqCst),
            mounted_now: Arc::clone(&self.mounted_now),
        }))
    }

    async fn confirm_payment(
        &self,
        _form: Arc<dyn PaymentForm>,
        client_secret: &str,
        _params: &ConfirmParams,
    ) -> Result<IntentSnapshot, ProviderError> {
        self.sdk.confirm_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .sdk
            .confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConfirmScript::Succeed);
        let id = client_secret.trim_start_matches("cs_").to_string();
        match next {
            ConfirmScript::Succeed => Ok(IntentSnapshot {
                id,
                status: IntentStatus::Succeeded,
                amount_minor: 0,
                currency: "USD".to_string(),
            }),
            ConfirmScript::RequiresAction => Ok(IntentSnapshot {
                id,
                status: IntentStatus::RequiresAction,
                amount_minor: 0,
                currency: "USD".to_string(),
            }),
            ConfirmScript::Declined => Err(ProviderError::with_code(
                ProviderErrorKind::CardDeclined,
                "card_declined",
                "Your card was declined.",
            )),
            ConfirmScript::FailTransport => Err(ProviderError::new(
                ProviderErrorKind::Network,
                "provider unreachable",
            )),
        }
    }

    async fn retrieve_payment_intent(
        &self,
        client_secret: &str,
    ) -> Result<IntentSnapshot, ProviderError> {
        Ok(IntentSnapshot {
            id: client_secret.trim_start_matches("cs_").to_string(),
            status: IntentStatus::Created,
            amount_minor: 0,
            currency: "USD".to_string(),
        })
    }
}

#[derive(Default)]
pub struct MockSdkFactory {
    pub loads: AtomicU32,
    pub sdk: Arc<MockSdk>,
    mounted_now: Arc<AtomicI32>,
}

impl MockSdkFactory {
    /// Net mount count across every form the factory's SDK produced.
    pub fn mounted_now(&self) -> i32 {
        self.mounted_now.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SdkFactory for MockSdkFactory {
    async fn load(&self, _publishable_key: &str) -> Result<Arc<dyn ProviderSdk>, ProviderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSdkHandle {
            sdk: Arc::clone(&self.sdk),
            mounted_now: Arc::clone(&self.mounted_now),
        }))
    }
}

// ==================== Order Placer Mock ====================

type PlaceHook = Box<dyn Fn() + Send + Sync>;

/// Creates sequential orders whose final total matches the estimate unless
/// overridden. `on_place` runs inside `place_order`, which lets a test flip
/// state mid-checkout.
#[derive(Default)]
pub struct MockOrderPlacer {
    pub orders_placed: AtomicU32,
    pub override_total: Mutex<Option<Decimal>>,
    pub on_place: Mutex<Option<PlaceHook>>,
}

#[async_trait]
impl OrderPlacer for MockOrderPlacer {
    async fn place_order(
        &self,
        _cart: &CartSession,
        estimate: &TotalEstimate,
    ) -> Result<OrderRef, ServiceError> {
        if let Some(hook) = self.on_place.lock().unwrap().as_ref() {
            hook();
        }
        let n = self.orders_placed.fetch_add(1, Ordering::SeqCst) + 1;
        let final_total = self
            .override_total
            .lock()
            .unwrap()
            .unwrap_or(estimate.total);
        Ok(OrderRef {
            order_id: Uuid::new_v4(),
            order_code: format!("ORD-{}", 1000 + n),
            final_total,
            customer_email: Some("shopper@example.com".to_string()),
        })
    }
}

// ==================== Harness ====================

pub struct TestHarness {
    pub stack: CheckoutStack,
    pub backend: Arc<MockBackend>,
    pub factory: Arc<MockSdkFactory>,
    pub placer: Arc<MockOrderPlacer>,
    pub events: mpsc::Receiver<Event>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        backend_url: "http://backend.test".to_string(),
        publishable_key: "pk_test_123".to_string(),
        settlement_base_delay_ms: 5,
        cart_flush_debounce_ms: 10,
        ..AppConfig::default()
    }
}

pub fn harness() -> TestHarness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: AppConfig) -> TestHarness {
    let backend = Arc::new(MockBackend::default());
    let factory = Arc::new(MockSdkFactory::default());
    let placer = Arc::new(MockOrderPlacer::default());
    let (stack, events) = CheckoutStack::new(
        config,
        Arc::clone(&backend) as Arc<dyn StorefrontBackend>,
        Arc::clone(&factory) as Arc<dyn SdkFactory>,
        Arc::new(InMemoryStorage::default()),
        Arc::clone(&placer) as Arc<dyn OrderPlacer>,
    );
    TestHarness {
        stack,
        backend,
        factory,
        placer,
        events,
    }
}

pub fn item(unit_price: Decimal, quantity: u32) -> CartItem {
    CartItem {
        variant_id: Uuid::new_v4(),
        quantity,
        unit_price,
        stock_snapshot: 100,
    }
}

/// Seeds the cart with 2 x $5.00 and 1 x $3.00, a $13.00 subtotal.
pub async fn seed_cart(harness: &TestHarness) {
    use rust_decimal_macros::dec;
    harness
        .stack
        .cart
        .add_item(item(dec!(5.00), 2))
        .await
        .expect("seed item");
    harness
        .stack
        .cart
        .add_item(item(dec!(3.00), 1))
        .await
        .expect("seed item");
}

pub fn mount() -> MountTarget {
    MountTarget::new("#payment-element")
}
