use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::pricing::round_money;
use crate::{
    entities::commerce::{coupon, DiscountType},
    errors::ServiceError,
    repositories::CommerceStore,
};

/// Coupon codes are matched case-insensitively and stored upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Checks `coupon` against a candidate subtotal and returns the discount it grants.
///
/// Checks run in order and the first failure wins: existence/active flag,
/// validity window, usage limit, minimum purchase. The returned amount is
/// rounded and never exceeds `subtotal`.
pub fn validate_coupon(
    coupon: Option<&coupon::Model>,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, ServiceError> {
    let coupon = match coupon {
        Some(c) if c.is_active => c,
        _ => return Err(ServiceError::CouponNotFound),
    };

    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(ServiceError::CouponExpired);
    }

    if let Some(limit) = coupon.usage_limit {
        if coupon.usage_count >= limit {
            return Err(ServiceError::CouponExhausted);
        }
    }

    if let Some(minimum) = coupon.min_purchase_amount {
        if subtotal < minimum {
            return Err(ServiceError::MinimumPurchaseNotMet {
                required: minimum.normalize(),
            });
        }
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = subtotal * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    };

    Ok(round_money(raw.max(Decimal::ZERO).min(subtotal)))
}

/// Result of a coupon preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponPreview {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
}

/// Read-only coupon lookups for the storefront.
#[derive(Clone)]
pub struct CouponService {
    store: Arc<dyn CommerceStore>,
}

impl CouponService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    /// Runs the coupon checks against an arbitrary amount without touching any cart.
    #[instrument(skip(self))]
    pub async fn preview(&self, code: &str, amount: Decimal) -> Result<CouponPreview, ServiceError> {
        if amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "amount must not be negative".into(),
            ));
        }

        let code = normalize_code(code);
        let mut tx = self.store.begin().await?;
        let coupon = tx.find_coupon(&code).await?;
        let discount_amount = validate_coupon(coupon.as_ref(), amount, Utc::now())?;
        let coupon = coupon.ok_or(ServiceError::CouponNotFound)?;

        debug!(%code, %discount_amount, "coupon preview");
        Ok(CouponPreview {
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            discount_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            discount_type,
            discount_value: value,
            min_purchase_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            is_active: true,
            created_at: now,
        }
    }

    #[test]
    fn percentage_discount() {
        let c = coupon(DiscountType::Percentage, dec!(10));
        assert_eq!(validate_coupon(Some(&c), dec!(1000), Utc::now()).unwrap(), dec!(100));
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut c = coupon(DiscountType::Percentage, dec!(50));
        c.max_discount_amount = Some(dec!(150));
        assert_eq!(validate_coupon(Some(&c), dec!(10000), Utc::now()).unwrap(), dec!(150));
        assert_eq!(validate_coupon(Some(&c), dec!(200), Utc::now()).unwrap(), dec!(100));
    }

    #[test]
    fn fixed_discount_is_clamped_to_subtotal() {
        let c = coupon(DiscountType::Fixed, dec!(300));
        assert_eq!(validate_coupon(Some(&c), dec!(120), Utc::now()).unwrap(), dec!(120));
    }

    #[test]
    fn missing_or_inactive_coupon_is_not_found() {
        assert_matches!(
            validate_coupon(None, dec!(100), Utc::now()),
            Err(ServiceError::CouponNotFound)
        );
        let mut c = coupon(DiscountType::Fixed, dec!(10));
        c.is_active = false;
        assert_matches!(
            validate_coupon(Some(&c), dec!(100), Utc::now()),
            Err(ServiceError::CouponNotFound)
        );
    }

    #[test]
    fn window_is_checked_before_usage_and_minimum() {
        let mut c = coupon(DiscountType::Fixed, dec!(10));
        c.valid_until = Utc::now() - Duration::hours(1);
        c.usage_limit = Some(1);
        c.usage_count = 1;
        c.min_purchase_amount = Some(dec!(1000));
        assert_matches!(
            validate_coupon(Some(&c), dec!(100), Utc::now()),
            Err(ServiceError::CouponExpired)
        );

        let mut c = coupon(DiscountType::Fixed, dec!(10));
        c.valid_from = Utc::now() + Duration::hours(1);
        assert_matches!(
            validate_coupon(Some(&c), dec!(100), Utc::now()),
            Err(ServiceError::CouponExpired)
        );
    }

    #[test]
    fn usage_limit_reached() {
        let mut c = coupon(DiscountType::Fixed, dec!(10));
        c.usage_limit = Some(5);
        c.usage_count = 5;
        c.min_purchase_amount = Some(dec!(1000));
        assert_matches!(
            validate_coupon(Some(&c), dec!(100), Utc::now()),
            Err(ServiceError::CouponExhausted)
        );
    }

    #[test]
    fn minimum_purchase_message_names_the_amount() {
        let mut c = coupon(DiscountType::Percentage, dec!(10));
        c.min_purchase_amount = Some(dec!(1000.0000));
        let err = validate_coupon(Some(&c), dec!(500), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::MinimumPurchaseNotMet { .. });
        assert_eq!(err.to_string(), "Minimum purchase amount of 1000 required");
    }

    #[test]
    fn normalizes_codes() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
    }
}
