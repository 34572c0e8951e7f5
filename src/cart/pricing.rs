//! Pure total estimation: subtotal, discount, and shipping.
//!
//! Shipping is a function of the discounted subtotal and destination only,
//! never a network call, so total estimation can run synchronously on every
//! cart change without blocking on I/O.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::{AppliedCoupon, CartItem, CouponKind};

/// Subtotal over surviving items: Σ(unit_price × quantity), exactly.
pub fn subtotal(items: &[CartItem]) -> Decimal {
    items.iter().map(CartItem::line_total).sum()
}

/// Discount amount for the applied coupon, clamped to the subtotal so a fixed
/// coupon can never push the total negative.
pub fn discount(subtotal: Decimal, coupon: Option<&AppliedCoupon>) -> Decimal {
    let raw = match coupon {
        None => Decimal::ZERO,
        Some(coupon) => match &coupon.kind {
            CouponKind::Percentage(pct) => (subtotal * *pct / dec!(100)).round_dp(2),
            CouponKind::Fixed(amount) => *amount,
        },
    };
    raw.clamp(Decimal::ZERO, subtotal)
}

/// Shipping fee table.
///
/// Free when the promotional flag is set. Domestic (US) orders pay a $5.00
/// flat rate under the $50 free-shipping threshold; international destinations
/// pay 10% of the discounted subtotal, rounded to cents.
pub fn shipping_fee(
    subtotal_after_discount: Decimal,
    country_code: &str,
    free_shipping: bool,
) -> Decimal {
    if free_shipping || subtotal_after_discount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if country_code.eq_ignore_ascii_case("US") {
        if subtotal_after_discount >= dec!(50) {
            Decimal::ZERO
        } else {
            dec!(5.00)
        }
    } else {
        (subtotal_after_discount * dec!(0.10)).round_dp(2)
    }
}

/// Estimated totals for a cart, used to size the provisional authorization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalEstimate {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

pub fn estimate_total(
    items: &[CartItem],
    coupon: Option<&AppliedCoupon>,
    country_code: &str,
    free_shipping: bool,
) -> TotalEstimate {
    let subtotal = subtotal(items);
    let discount = discount(subtotal, coupon);
    let after_discount = subtotal - discount;
    let shipping = shipping_fee(after_discount, country_code, free_shipping);
    TotalEstimate {
        subtotal,
        discount,
        shipping,
        total: after_discount + shipping,
    }
}
