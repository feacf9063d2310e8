use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    db::DbPool,
    entities::promo_code::{DiscountType, Entity as PromoCode, Model as PromoCodeModel},
    errors::ServiceError,
};

/// Discount applied to a subtotal, both values in the smallest currency unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscountBreakdown {
    pub discount: i64,
    pub total: i64,
}

/// Canonical form of a promo code: surrounding whitespace stripped,
/// uppercased with full Unicode casing so Cyrillic codes normalize correctly.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// A promo is usable at `now` iff it is active and `now` falls inside the
/// inclusive validity window (null bounds are unbounded).
pub fn is_valid_at(promo: &PromoCodeModel, now: DateTime<Utc>) -> bool {
    if !promo.is_active {
        return false;
    }
    if let Some(starts_at) = promo.starts_at {
        if now < starts_at {
            return false;
        }
    }
    if let Some(ends_at) = promo.ends_at {
        if now > ends_at {
            return false;
        }
    }
    true
}

/// Computes the discount for a subtotal. Pure and deterministic; callers
/// pre-validate the value ranges (1–100 for PERCENT, ≥ 1 for FIXED).
pub fn compute_discount(subtotal: i64, discount_type: DiscountType, value: i64) -> DiscountBreakdown {
    let discount = match discount_type {
        // round(subtotal * value / 100), half away from zero
        DiscountType::Percent => {
            ((subtotal as i128 * value as i128 + 50) / 100).min(subtotal as i128) as i64
        }
        // A fixed discount can never exceed the subtotal.
        DiscountType::Fixed => value.min(subtotal),
    };

    DiscountBreakdown {
        discount,
        total: (subtotal - discount).max(0),
    }
}

/// Read-only promo lookups against the promo store.
#[derive(Clone)]
pub struct PromoService {
    db: Arc<DbPool>,
}

impl PromoService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Finds a promo usable at `now`, or `None` when the code is unknown,
    /// inactive or outside its validity window.
    #[instrument(skip(self), fields(code = %raw_code))]
    pub async fn find_usable(
        &self,
        raw_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PromoCodeModel>, ServiceError> {
        let code = normalize_code(raw_code);
        if code.is_empty() {
            return Ok(None);
        }

        let promo = PromoCode::find_by_id(code.clone()).one(&*self.db).await?;

        match promo {
            Some(promo) if is_valid_at(&promo, now) => Ok(Some(promo)),
            Some(_) => {
                debug!(%code, "promo code exists but is not currently valid");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
