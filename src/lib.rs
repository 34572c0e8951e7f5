//! Cart-to-payment settlement pipeline for a headless storefront.
//!
//! The pipeline owns the client-side cart, sizes a provisional payment
//! authorization against the estimated total, binds it to the backend order,
//! drives the payment provider confirmation, and settles the result with
//! bounded retries. External collaborators (storefront backend, payment SDK,
//! durable cart storage, order placement) are injected through traits so the
//! pipeline stays testable end to end.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod backend;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod errors;
pub mod events;
pub mod payments;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    backend::StorefrontBackend,
    cart::{storage::CartStorage, LocalCartStore},
    checkout::{CheckoutOrchestrator, OrderPlacer},
    config::AppConfig,
    errors::ServiceError,
    events::{event_channel, Event, EventSender},
    payments::{
        gateway::PaymentIntentGateway, provider::SdkFactory, provider::SdkLoader,
        settlement::SettlementRetryEngine,
    },
};

/// Fully wired pipeline. Construction is cheap and synchronous; the SDK loads
/// lazily on the first checkout.
#[derive(Clone)]
pub struct CheckoutStack {
    pub config: Arc<AppConfig>,
    pub cart: Arc<LocalCartStore>,
    pub gateway: Arc<PaymentIntentGateway>,
    pub settlement: Arc<SettlementRetryEngine>,
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub event_sender: Arc<EventSender>,
}

impl CheckoutStack {
    /// Wires every component against the injected collaborators and returns
    /// the stack together with the receiving end of the advisory event
    /// channel.
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn StorefrontBackend>,
        sdk_factory: Arc<dyn SdkFactory>,
        storage: Arc<dyn CartStorage>,
        order_placer: Arc<dyn OrderPlacer>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let config = Arc::new(config);
        let (event_sender, event_receiver) = event_channel(config.event_channel_capacity);
        let event_sender = Arc::new(event_sender);

        let cart = Arc::new(LocalCartStore::new(
            storage,
            Arc::clone(&event_sender),
            &config,
        ));
        let gateway = Arc::new(PaymentIntentGateway::new(
            Arc::clone(&backend),
            Arc::clone(&event_sender),
            Arc::clone(&config),
        ));
        let settlement = Arc::new(SettlementRetryEngine::new(
            Arc::clone(&backend),
            Arc::clone(&event_sender),
        ));
        let sdk = Arc::new(SdkLoader::new(sdk_factory, config.publishable_key.clone()));
        let orchestrator = Arc::new(CheckoutOrchestrator::new(
            Arc::clone(&cart),
            Arc::clone(&gateway),
            Arc::clone(&settlement),
            sdk,
            backend,
            order_placer,
            Arc::clone(&event_sender),
            Arc::clone(&config),
        ));

        (
            Self {
                config,
                cart,
                gateway,
                settlement,
                orchestrator,
                event_sender,
            },
            event_receiver,
        )
    }

    /// Restores any persisted cart session. Call once at startup.
    pub async fn hydrate(&self) -> Result<(), ServiceError> {
        self.cart.hydrate().await
    }
}
