//! Coupon pricing rules.
//!
//! Everything here is pure: the same functions price a cart at validation
//! time and at checkout, so a discount can never be computed two
//! different ways.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;

use crate::models::coupon;
use crate::models::DiscountType;

/// Currency amounts are kept to cents
pub const MONEY_SCALE: u32 = 2;

/// Rounds to cents, midpoint away from zero ("half-up" for positive amounts)
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Renders an amount with exactly two decimals, e.g. `"9.00"`
pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

/// The part of the cart a coupon may discount: never the shipping line, never negative
pub fn discountable_base(subtotal: Decimal, shipping_cost: Decimal) -> Decimal {
    (subtotal - shipping_cost).max(Decimal::ZERO)
}

/// The single authoritative discount computation.
///
/// `subtotal` is the cart amount the coupon is checked against and
/// `shipping_cost` the part of it that is never discounted.
pub fn compute_discount(
    discount_type: DiscountType,
    discount_value: Decimal,
    subtotal: Decimal,
    shipping_cost: Decimal,
) -> Decimal {
    let base = discountable_base(subtotal, shipping_cost);
    match discount_type {
        DiscountType::Fixed => {
            let capped = discount_value.max(Decimal::ZERO).min(base);
            let rounded = round_money(capped);
            // rounding up must not push a capped discount past the base
            if rounded > base {
                capped.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero)
            } else {
                rounded
            }
        }
        DiscountType::Percentage => {
            // rate ≤ 1, so the product never exceeds the base and cannot overflow
            let rate = discount_value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
                / Decimal::ONE_HUNDRED;
            round_money(base * rate)
        }
    }
}

/// Why a coupon cannot be applied. The display strings are shown to shoppers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    NotFound,
    Inactive,
    Expired,
    Exhausted,
    MinimumNotMet { minimum: Decimal },
}

impl CouponRejection {
    /// Stable machine-readable code for logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "not_found",
            CouponRejection::Inactive => "inactive",
            CouponRejection::Expired => "expired",
            CouponRejection::Exhausted => "exhausted",
            CouponRejection::MinimumNotMet { .. } => "minimum_not_met",
        }
    }
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouponRejection::NotFound => f.write_str("cupón no encontrado o inválido"),
            CouponRejection::Inactive => f.write_str("cupón inactivo"),
            CouponRejection::Expired => f.write_str("cupón expirado"),
            CouponRejection::Exhausted => f.write_str("cupón agotado"),
            CouponRejection::MinimumNotMet { minimum } => write!(
                f,
                "monto mínimo no alcanzado (mínimo {})",
                format_money(*minimum)
            ),
        }
    }
}

impl std::error::Error for CouponRejection {}

/// Runs the usability checks in order, stopping at the first failure.
///
/// `subtotal` is `None` when only usability matters (e.g. re-deriving why a
/// redemption was refused), which skips the minimum purchase check.
pub fn check_coupon(
    coupon: &coupon::Model,
    subtotal: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if coupon.is_deleted() {
        return Err(CouponRejection::NotFound);
    }
    if !coupon.active {
        return Err(CouponRejection::Inactive);
    }
    if coupon.is_expired(now) {
        return Err(CouponRejection::Expired);
    }
    if coupon.is_exhausted() {
        return Err(CouponRejection::Exhausted);
    }
    if let (Some(minimum), Some(subtotal)) = (coupon.min_purchase_amount, subtotal) {
        if subtotal < minimum {
            return Err(CouponRejection::MinimumNotMet { minimum });
        }
    }
    Ok(())
}

/// Checks a coupon and prices it in one step
pub fn evaluate_coupon(
    coupon: &coupon::Model,
    subtotal: Decimal,
    shipping_cost: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, CouponRejection> {
    check_coupon(coupon, Some(subtotal), now)?;
    Ok(compute_discount(
        coupon.discount_type,
        coupon.discount_value,
        subtotal,
        shipping_cost,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn save10(now: DateTime<Utc>) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            name: "Ten percent".into(),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            min_purchase_amount: Some(dec!(50)),
            usage_limit: Some(100),
            usage_count: 99,
            active: true,
            featured: false,
            expires_at: now + Duration::days(7),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentage_discount_excludes_shipping() {
        let now = Utc::now();
        let discount = evaluate_coupon(&save10(now), dec!(100), dec!(10), now).unwrap();
        assert_eq!(discount, dec!(9));
        assert_eq!(format_money(discount), "9.00");
    }

    #[test]
    fn below_minimum_names_the_minimum() {
        let now = Utc::now();
        let err = evaluate_coupon(&save10(now), dec!(40), Decimal::ZERO, now).unwrap_err();
        assert_eq!(err, CouponRejection::MinimumNotMet { minimum: dec!(50) });
        assert_eq!(err.to_string(), "monto mínimo no alcanzado (mínimo 50.00)");
    }

    #[test]
    fn checks_short_circuit_in_order() {
        let now = Utc::now();
        let mut coupon = save10(now);
        coupon.active = false;
        coupon.expires_at = now - Duration::days(1);
        coupon.usage_count = 100;
        assert_eq!(
            check_coupon(&coupon, Some(dec!(1)), now),
            Err(CouponRejection::Inactive)
        );

        coupon.active = true;
        assert_eq!(
            check_coupon(&coupon, Some(dec!(1)), now),
            Err(CouponRejection::Expired)
        );

        coupon.expires_at = now + Duration::days(1);
        assert_eq!(
            check_coupon(&coupon, Some(dec!(1)), now),
            Err(CouponRejection::Exhausted)
        );
        assert_eq!(CouponRejection::Exhausted.to_string(), "cupón agotado");
    }

    #[test]
    fn deleted_coupons_read_as_not_found() {
        let now = Utc::now();
        let mut coupon = save10(now);
        coupon.deleted_at = Some(now);
        assert_eq!(
            check_coupon(&coupon, Some(dec!(500)), now),
            Err(CouponRejection::NotFound)
        );
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let mut coupon = save10(now);
        coupon.expires_at = now;
        assert_eq!(
            check_coupon(&coupon, None, now),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn fixed_discount_is_capped_at_the_base() {
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(50), dec!(30), dec!(10)),
            dec!(20)
        );
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(50), dec!(5), dec!(10)),
            Decimal::ZERO
        );
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(15), dec!(100), dec!(10)),
            dec!(15)
        );
    }

    #[test]
    fn percentage_of_the_largest_subtotal_stays_in_range() {
        let discount = compute_discount(DiscountType::Percentage, dec!(10), Decimal::MAX, dec!(10));
        assert!(discount > Decimal::ZERO);
        assert!(discount < Decimal::MAX);

        let all = compute_discount(DiscountType::Percentage, dec!(100), Decimal::MAX, Decimal::ZERO);
        assert_eq!(all, Decimal::MAX);
    }

    #[test]
    fn fixed_cap_never_rounds_past_base() {
        let discount = compute_discount(DiscountType::Fixed, dec!(100), dec!(10.005), Decimal::ZERO);
        assert_eq!(discount, dec!(10.00));
    }

    #[test]
    fn rounding_is_half_up() {
        // 0.125 * 100% -> 0.13
        assert_eq!(
            compute_discount(DiscountType::Percentage, dec!(50), dec!(0.25), Decimal::ZERO),
            dec!(0.13)
        );
        assert_eq!(round_money(dec!(2.675)), dec!(2.68));
        assert_eq!(format_money(dec!(7)), "7.00");
    }
}
