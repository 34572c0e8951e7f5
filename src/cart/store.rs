use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, RwLockWriteGuard,
};
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    storage::CartStorage,
    AppliedCoupon, CartItem, CartSession, CouponKind,
};
use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Authoritative client-side cart.
///
/// Mutations are synchronous against in-memory state; durable storage is
/// written by a debounced background flush so rapid repeated updates collapse
/// into one persisted write. Every successful mutation emits an advisory cart
/// event consumed by UI badges.
#[derive(Clone)]
pub struct LocalCartStore {
    state: Arc<RwLock<Option<CartSession>>>,
    storage: Arc<dyn CartStorage>,
    event_sender: Arc<EventSender>,
    currency: String,
    flush_debounce: Duration,
    flush_scheduled: Arc<AtomicBool>,
}

impl LocalCartStore {
    pub fn new(
        storage: Arc<dyn CartStorage>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(None)),
            storage,
            event_sender,
            currency: config.currency.clone(),
            flush_debounce: Duration::from_millis(config.cart_flush_debounce_ms),
            flush_scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Restores the session persisted for this client profile, if any.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<(), ServiceError> {
        if let Some(session) = self.storage.load().await? {
            info!("Restored cart {} from durable storage", session.cart_uuid);
            *self.write_state()? = Some(session);
        }
        Ok(())
    }

    /// Adds an item, merging quantities when the variant is already present.
    /// The session is created lazily on the first mutation.
    #[instrument(skip(self))]
    pub async fn add_item(&self, item: CartItem) -> Result<CartSession, ServiceError> {
        if item.quantity == 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        if item.quantity > item.stock_snapshot {
            return Err(ServiceError::ValidationError(format!(
                "Requested quantity {} exceeds available stock {}",
                item.quantity, item.stock_snapshot
            )));
        }

        let (snapshot, created, event) = {
            let mut guard = self.write_state()?;
            let created = guard.is_none();
            let session = guard.get_or_insert_with(|| CartSession::new(&self.currency));

            if let Some(existing) = session
                .items
                .iter_mut()
                .find(|i| i.variant_id == item.variant_id)
            {
                let merged = existing.quantity + item.quantity;
                if merged > item.stock_snapshot {
                    return Err(ServiceError::ValidationError(format!(
                        "Requested quantity {} exceeds available stock {}",
                        merged, item.stock_snapshot
                    )));
                }
                existing.quantity = merged;
                existing.unit_price = item.unit_price;
                existing.stock_snapshot = item.stock_snapshot;
            } else {
                session.items.push(item.clone());
            }
            session.recalculate();

            let event = Event::CartItemAdded {
                cart_uuid: session.cart_uuid,
                variant_id: item.variant_id,
                quantity: item.quantity,
            };
            (session.clone(), created, event)
        };

        if created {
            self.event_sender
                .send_or_log(Event::CartCreated(snapshot.cart_uuid))
                .await;
        }
        self.event_sender.send_or_log(event).await;
        self.schedule_flush();

        info!(
            "Added item to cart {}: variant {} x{}",
            snapshot.cart_uuid, item.variant_id, item.quantity
        );
        Ok(snapshot)
    }

    /// Sets the quantity for a variant; zero removes the line.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        variant_id: Uuid,
        quantity: u32,
    ) -> Result<CartSession, ServiceError> {
        if quantity == 0 {
            return self.remove_item(variant_id).await;
        }

        let (snapshot, event) = {
            let mut guard = self.write_state()?;
            let session = guard
                .as_mut()
                .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
            let item = session
                .items
                .iter_mut()
                .find(|i| i.variant_id == variant_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Variant {} not in cart", variant_id))
                })?;
            if quantity > item.stock_snapshot {
                return Err(ServiceError::ValidationError(format!(
                    "Requested quantity {} exceeds available stock {}",
                    quantity, item.stock_snapshot
                )));
            }
            item.quantity = quantity;
            session.recalculate();

            let event = Event::CartItemUpdated {
                cart_uuid: session.cart_uuid,
                variant_id,
                quantity,
            };
            (session.clone(), event)
        };

        self.event_sender.send_or_log(event).await;
        self.schedule_flush();
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, variant_id: Uuid) -> Result<CartSession, ServiceError> {
        let (snapshot, event) = {
            let mut guard = self.write_state()?;
            let session = guard
                .as_mut()
                .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
            let before = session.items.len();
            session.items.retain(|i| i.variant_id != variant_id);
            if session.items.len() == before {
                return Err(ServiceError::NotFound(format!(
                    "Variant {} not in cart",
                    variant_id
                )));
            }
            session.recalculate();

            let event = Event::CartItemRemoved {
                cart_uuid: session.cart_uuid,
                variant_id,
            };
            (session.clone(), event)
        };

        self.event_sender.send_or_log(event).await;
        self.schedule_flush();
        Ok(snapshot)
    }

    /// Applies a coupon to the active session, replacing any prior one.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, coupon: AppliedCoupon) -> Result<CartSession, ServiceError> {
        match &coupon.kind {
            CouponKind::Percentage(pct) if *pct < Decimal::ZERO || *pct > dec!(100) => {
                return Err(ServiceError::ValidationError(
                    "Percentage coupon must be between 0 and 100".to_string(),
                ));
            }
            CouponKind::Fixed(amount) if *amount < Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "Fixed coupon must not be negative".to_string(),
                ));
            }
            _ => {}
        }

        let (snapshot, event) = {
            let mut guard = self.write_state()?;
            let session = guard
                .as_mut()
                .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
            let event = Event::CouponApplied {
                cart_uuid: session.cart_uuid,
                code: coupon.code.clone(),
            };
            session.applied_coupon = Some(coupon);
            session.recalculate();
            (session.clone(), event)
        };

        self.event_sender.send_or_log(event).await;
        self.schedule_flush();
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self) -> Result<CartSession, ServiceError> {
        let (snapshot, event) = {
            let mut guard = self.write_state()?;
            let session = guard
                .as_mut()
                .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))?;
            session.applied_coupon = None;
            session.recalculate();
            let event = Event::CouponRemoved {
                cart_uuid: session.cart_uuid,
            };
            (session.clone(), event)
        };

        self.event_sender.send_or_log(event).await;
        self.schedule_flush();
        Ok(snapshot)
    }

    /// Destroys the session and its durable copy. The removal is flushed
    /// immediately rather than debounced.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), ServiceError> {
        let cleared = { self.write_state()?.take() };
        self.storage.remove().await?;
        if let Some(session) = cleared {
            self.event_sender
                .send_or_log(Event::CartCleared(session.cart_uuid))
                .await;
            info!("Cleared cart {}", session.cart_uuid);
        }
        Ok(())
    }

    /// Immutable copy of the current session; downstream consumers are not
    /// affected by concurrent mutation.
    pub fn snapshot(&self) -> Result<Option<CartSession>, ServiceError> {
        Ok(self
            .state
            .read()
            .map_err(|_| ServiceError::InternalError("cart state lock poisoned".to_string()))?
            .clone())
    }

    /// Bypasses the debounce window; used at teardown and in tests.
    pub async fn flush_now(&self) -> Result<(), ServiceError> {
        match self.snapshot()? {
            Some(session) => self.storage.persist(&session).await,
            None => self.storage.remove().await,
        }
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, Option<CartSession>>, ServiceError> {
        self.state
            .write()
            .map_err(|_| ServiceError::InternalError("cart state lock poisoned".to_string()))
    }

    /// Schedules a debounced flush; mutations inside the window coalesce into
    /// one persisted write.
    fn schedule_flush(&self) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(&self.state);
        let storage = Arc::clone(&self.storage);
        let scheduled = Arc::clone(&self.flush_scheduled);
        let delay = self.flush_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduled.store(false, Ordering::SeqCst);
            let snapshot = state.read().ok().and_then(|guard| (*guard).clone());
            let result = match snapshot {
                Some(session) => storage.persist(&session).await,
                None => storage.remove().await,
            };
            if let Err(e) = result {
                warn!("cart flush failed: {}", e);
            }
        });
    }
}
