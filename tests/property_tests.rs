//! Property-based tests for coupon pricing and the tracking decision.
//!
//! These exercise the pure functions directly, so every case runs without a
//! database.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use storefront_api::{
    models::{coupon, DiscountType, ShippingStatus},
    services::{
        discounts::{check_coupon, compute_discount, evaluate_coupon, CouponRejection},
        shipping::{decide, TrackingDecision},
    },
};
use uuid::Uuid;

// Strategies for generating test data
fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn percent_strategy() -> impl Strategy<Value = Decimal> {
    // 0.01 ..= 100.00
    (1i64..=10_000).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

fn state_strategy() -> impl Strategy<Value = ShippingStatus> {
    prop_oneof![
        Just(ShippingStatus::Quoted),
        Just(ShippingStatus::GuideCreated),
        Just(ShippingStatus::InTransit),
        Just(ShippingStatus::Delivered),
        Just(ShippingStatus::Cancelled),
    ]
}

fn coupon_with(discount_type: DiscountType, discount_value: Decimal) -> coupon::Model {
    let now = Utc::now();
    coupon::Model {
        id: Uuid::new_v4(),
        code: "PROP".into(),
        name: "Property coupon".into(),
        discount_type,
        discount_value,
        min_purchase_amount: None,
        usage_limit: None,
        usage_count: 0,
        active: true,
        featured: false,
        expires_at: now + Duration::days(30),
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn base(subtotal: Decimal, shipping: Decimal) -> Decimal {
    (subtotal - shipping).max(Decimal::ZERO)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn fixed_discount_never_exceeds_goods(
        value in money_strategy(),
        subtotal in money_strategy(),
        shipping in money_strategy(),
    ) {
        let discount = compute_discount(DiscountType::Fixed, value, subtotal, shipping);
        prop_assert!(discount <= base(subtotal, shipping), "{} > base", discount);
        prop_assert!(discount >= Decimal::ZERO);
    }

    #[test]
    fn percentage_discount_matches_formula(
        value in percent_strategy(),
        subtotal in money_strategy(),
        shipping in money_strategy(),
    ) {
        let expected = (base(subtotal, shipping) * value / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let coupon = coupon_with(DiscountType::Percentage, value);
        let discount = evaluate_coupon(&coupon, subtotal, shipping, Utc::now()).unwrap();
        prop_assert_eq!(discount, expected);
        prop_assert!(discount <= base(subtotal, shipping));
    }

    #[test]
    fn exhausted_coupon_is_never_valid(
        limit in 1i32..10_000,
        subtotal in money_strategy(),
    ) {
        let mut coupon = coupon_with(DiscountType::Fixed, Decimal::ONE);
        coupon.usage_limit = Some(limit);
        coupon.usage_count = limit;
        prop_assert_eq!(
            check_coupon(&coupon, Some(subtotal), Utc::now()),
            Err(CouponRejection::Exhausted)
        );
    }

    #[test]
    fn expired_coupon_is_never_valid(
        seconds_ago in 0i64..(400 * 24 * 3600),
        subtotal in money_strategy(),
    ) {
        let now = Utc::now();
        let mut coupon = coupon_with(DiscountType::Percentage, Decimal::TEN);
        coupon.expires_at = now - Duration::seconds(seconds_ago);
        prop_assert_eq!(
            evaluate_coupon(&coupon, subtotal, Decimal::ZERO, now),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn deleted_coupon_is_never_valid(subtotal in money_strategy()) {
        let now = Utc::now();
        let mut coupon = coupon_with(DiscountType::Fixed, Decimal::TEN);
        coupon.deleted_at = Some(now);
        prop_assert_eq!(
            check_coupon(&coupon, Some(subtotal), now),
            Err(CouponRejection::NotFound)
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn tracking_never_moves_backwards(current in state_strategy(), incoming in state_strategy()) {
        match decide(current, incoming, false) {
            TrackingDecision::Advance(next) => {
                prop_assert!(!current.is_terminal());
                prop_assert_eq!(next, incoming);
                if let (Some(have), Some(got)) = (current.rank(), next.rank()) {
                    prop_assert!(got > have);
                }
            }
            TrackingDecision::AfterTerminal => prop_assert!(current.is_terminal()),
            TrackingDecision::Refine => prop_assert_eq!(current, incoming),
            TrackingDecision::Stale => {}
            TrackingDecision::Duplicate => prop_assert!(false, "unrecorded update reported as duplicate"),
        }
    }

    #[test]
    fn replays_never_change_state(current in state_strategy(), incoming in state_strategy()) {
        prop_assert_eq!(decide(current, incoming, true), TrackingDecision::Duplicate);
    }
}
