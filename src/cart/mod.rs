pub mod pricing;
pub mod storage;
pub mod store;

pub use store::LocalCartStore;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client-owned cart session.
///
/// The `cart_uuid` is generated once on the first mutation and stays immutable
/// for the session's lifetime; it is the correlation key between the cart, its
/// payment authorization, and the eventual settlement. The session is
/// destroyed on successful settlement or an explicit clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSession {
    pub cart_uuid: Uuid,
    pub items: Vec<CartItem>,
    pub subtotal: Decimal,
    pub applied_coupon: Option<AppliedCoupon>,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl CartSession {
    pub fn new(currency: &str) -> Self {
        Self {
            cart_uuid: Uuid::new_v4(),
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            applied_coupon: None,
            currency: currency.to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Recomputes the stored subtotal from the surviving items.
    pub fn recalculate(&mut self) {
        self.subtotal = pricing::subtotal(&self.items);
        self.updated_at = Utc::now();
    }
}

/// One cart line. Quantity is bounded by `stock_snapshot` at add time; live
/// stock is re-checked before checkout since stock is never locked client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub variant_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub stock_snapshot: u32,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Coupon applied to the whole cart, before shipping estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub kind: CouponKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CouponKind {
    /// Percentage of the subtotal, 0-100
    Percentage(Decimal),
    /// Fixed amount in cart currency
    Fixed(Decimal),
}
