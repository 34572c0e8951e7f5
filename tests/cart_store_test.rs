//! Tests for the client-owned cart store: exact money arithmetic, stock
//! bounds, and the debounced flush to durable storage.

mod common;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{harness, item};
use storefront_checkout::{
    backend::StorefrontBackend,
    cart::{
        pricing::estimate_total,
        storage::{CartStorage, InMemoryStorage},
        AppliedCoupon, CartItem, CartSession, CouponKind,
    },
    checkout::OrderPlacer,
    errors::ServiceError,
    payments::provider::SdkFactory,
    CheckoutStack,
};

/// Storage wrapper that counts persisted writes, for observing flush
/// coalescing.
#[derive(Default)]
struct CountingStorage {
    inner: InMemoryStorage,
    persists: AtomicU32,
}

#[async_trait]
impl CartStorage for CountingStorage {
    async fn load(&self) -> Result<Option<CartSession>, ServiceError> {
        self.inner.load().await
    }

    async fn persist(&self, session: &CartSession) -> Result<(), ServiceError> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        self.inner.persist(session).await
    }

    async fn remove(&self) -> Result<(), ServiceError> {
        self.inner.remove().await
    }
}

fn stack_with_storage(storage: Arc<dyn CartStorage>) -> CheckoutStack {
    let (stack, _events) = CheckoutStack::new(
        common::test_config(),
        Arc::new(common::MockBackend::default()) as Arc<dyn StorefrontBackend>,
        Arc::new(common::MockSdkFactory::default()) as Arc<dyn SdkFactory>,
        storage,
        Arc::new(common::MockOrderPlacer::default()) as Arc<dyn OrderPlacer>,
    );
    stack
}

// ==================== Arithmetic Tests ====================

#[tokio::test]
async fn test_subtotal_exact_under_mutation_sequence() {
    let h = harness();
    let cart = &h.stack.cart;

    let keep = item(dec!(19.99), 3);
    let keep_id = keep.variant_id;
    let extra = item(dec!(0.10), 7);
    let extra_id = extra.variant_id;

    cart.add_item(keep).await.unwrap();
    cart.add_item(extra).await.unwrap();
    assert_eq!(cart.snapshot().unwrap().unwrap().subtotal, dec!(60.67));

    let session = cart.update_quantity(keep_id, 2).await.unwrap();
    assert_eq!(session.subtotal, dec!(40.68));

    let session = cart.remove_item(extra_id).await.unwrap();
    assert_eq!(session.subtotal, dec!(39.98));
}

#[tokio::test]
async fn test_adding_same_variant_merges_quantities() {
    let h = harness();
    let line = item(dec!(5.00), 1);
    let variant_id = line.variant_id;

    h.stack.cart.add_item(line.clone()).await.unwrap();
    let session = h.stack.cart.add_item(line).await.unwrap();

    assert_eq!(session.items.len(), 1);
    assert_eq!(session.items[0].variant_id, variant_id);
    assert_eq!(session.items[0].quantity, 2);
    assert_eq!(session.subtotal, dec!(10.00));
}

#[tokio::test]
async fn test_zero_quantity_removes_the_line() {
    let h = harness();
    let line = item(dec!(8.00), 2);
    let variant_id = line.variant_id;
    h.stack.cart.add_item(line).await.unwrap();

    let session = h.stack.cart.update_quantity(variant_id, 0).await.unwrap();

    assert!(session.is_empty());
    assert_eq!(session.subtotal, Decimal::ZERO);
}

// ==================== Stock Bound Tests ====================

#[tokio::test]
async fn test_add_beyond_stock_snapshot_rejected() {
    let h = harness();
    let line = CartItem {
        variant_id: Uuid::new_v4(),
        quantity: 4,
        unit_price: dec!(10.00),
        stock_snapshot: 3,
    };

    let err = h.stack.cart.add_item(line).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(h.stack.cart.snapshot().unwrap().is_none());
}

#[tokio::test]
async fn test_merge_beyond_stock_snapshot_rejected() {
    let h = harness();
    let line = CartItem {
        variant_id: Uuid::new_v4(),
        quantity: 2,
        unit_price: dec!(10.00),
        stock_snapshot: 3,
    };
    h.stack.cart.add_item(line.clone()).await.unwrap();

    let err = h.stack.cart.add_item(line).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    // The original line is untouched.
    let session = h.stack.cart.snapshot().unwrap().unwrap();
    assert_eq!(session.items[0].quantity, 2);
}

// ==================== Coupon Tests ====================

#[tokio::test]
async fn test_coupon_flows_into_the_estimate() {
    let h = harness();
    h.stack.cart.add_item(item(dec!(100.00), 1)).await.unwrap();
    h.stack
        .cart
        .apply_coupon(AppliedCoupon {
            code: "TEN".to_string(),
            kind: CouponKind::Percentage(dec!(10)),
        })
        .await
        .unwrap();

    let session = h.stack.cart.snapshot().unwrap().unwrap();
    let estimate = estimate_total(&session.items, session.applied_coupon.as_ref(), "US", false);
    assert_eq!(estimate.discount, dec!(10.00));
    // $90.00 after discount clears the domestic free-shipping threshold.
    assert_eq!(estimate.total, dec!(90.00));
}

#[tokio::test]
async fn test_over_hundred_percent_coupon_rejected() {
    let h = harness();
    h.stack.cart.add_item(item(dec!(10.00), 1)).await.unwrap();

    let err = h
        .stack
        .cart
        .apply_coupon(AppliedCoupon {
            code: "BROKEN".to_string(),
            kind: CouponKind::Percentage(dec!(150)),
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
}

// ==================== Flush and Hydration Tests ====================

#[tokio::test(start_paused = true)]
async fn test_rapid_mutations_coalesce_into_one_flush() {
    let storage = Arc::new(CountingStorage::default());
    let stack = stack_with_storage(Arc::clone(&storage) as Arc<dyn CartStorage>);

    let line = item(dec!(2.00), 1);
    let variant_id = line.variant_id;
    stack.cart.add_item(line).await.unwrap();
    stack.cart.update_quantity(variant_id, 3).await.unwrap();
    stack.cart.update_quantity(variant_id, 5).await.unwrap();

    // Let the debounce window elapse.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(storage.persists.load(Ordering::SeqCst), 1);

    // The persisted copy reflects the final state, not an intermediate one.
    let stored = storage.load().await.unwrap().unwrap();
    assert_eq!(stored.items[0].quantity, 5);

    // A mutation after the window schedules a fresh flush.
    stack.cart.update_quantity(variant_id, 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(storage.persists.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_then_hydrate_restores_nothing() {
    let storage = Arc::new(InMemoryStorage::default());
    let stack = stack_with_storage(Arc::clone(&storage) as Arc<dyn CartStorage>);

    stack.cart.add_item(item(dec!(7.50), 2)).await.unwrap();
    stack.cart.flush_now().await.unwrap();
    stack.cart.clear().await.unwrap();

    // Clear removed the durable copy too; a new store restores nothing.
    let restored = stack_with_storage(Arc::clone(&storage) as Arc<dyn CartStorage>);
    restored.hydrate().await.unwrap();
    assert!(restored.cart.snapshot().unwrap().is_none());
}

#[tokio::test]
async fn test_hydrate_restores_persisted_session() {
    let storage = Arc::new(InMemoryStorage::default());
    let stack = stack_with_storage(Arc::clone(&storage) as Arc<dyn CartStorage>);

    stack.cart.add_item(item(dec!(7.50), 2)).await.unwrap();
    let session = stack.cart.snapshot().unwrap().unwrap();
    stack.cart.flush_now().await.unwrap();

    let restored = stack_with_storage(Arc::clone(&storage) as Arc<dyn CartStorage>);
    restored.hydrate().await.unwrap();
    let hydrated = restored.cart.snapshot().unwrap().unwrap();
    assert_eq!(hydrated.cart_uuid, session.cart_uuid);
    assert_eq!(hydrated.subtotal, dec!(15.00));
}
