//! Refund policy: how much of a charge comes back, by days until delivery.
//!
//! | days until delivery | rate |
//! |---------------------|------|
//! | 3 or more           | 100% |
//! | 2                   | 70%  |
//! | 1                   | 50%  |
//! | same day or past    | 0%   |
//!
//! Days are counted between calendar dates in the business timezone, so a
//! request at 23:59 and one at 00:01 the next morning fall into different
//! tiers.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Money;

/// Fraction of a charge returned to the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundRate(Decimal);

impl RefundRate {
    /// Everything back.
    pub const FULL: Self = Self(Decimal::ONE);
    /// 70% back.
    pub const SEVENTY: Self = Self(Decimal::from_parts(7, 0, 0, false, 1));
    /// Half back.
    pub const HALF: Self = Self(Decimal::from_parts(5, 0, 0, false, 1));
    /// Nothing back; cancellation is closed.
    pub const NONE: Self = Self(Decimal::ZERO);

    /// The rate as a decimal fraction.
    #[must_use]
    pub const fn as_decimal(self) -> Decimal {
        self.0
    }

    /// The rate as whole percent, for display.
    #[must_use]
    pub fn percent(self) -> Decimal {
        (self.0 * Decimal::ONE_HUNDRED).normalize()
    }

    /// Whether anything is refunded at this rate.
    #[must_use]
    pub fn allows_cancellation(self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Apply the rate to a charge, rounding down to whole won.
    #[must_use]
    pub fn apply(self, target: Money) -> Money {
        target.scale_floor(self.0)
    }
}

impl std::fmt::Display for RefundRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Whole calendar days from `today` until `delivery_date` (negative if past).
#[must_use]
pub fn days_until(delivery_date: NaiveDate, today: NaiveDate) -> i64 {
    delivery_date.signed_duration_since(today).num_days()
}

/// Refund rate for a delivery on `delivery_date`, requested on `today`.
#[must_use]
pub fn refund_rate(delivery_date: NaiveDate, today: NaiveDate) -> RefundRate {
    match days_until(delivery_date, today) {
        d if d >= 3 => RefundRate::FULL,
        2 => RefundRate::SEVENTY,
        1 => RefundRate::HALF,
        _ => RefundRate::NONE,
    }
}

/// `floor(target × rate)`.
#[must_use]
pub fn refund_amount(target: Money, rate: RefundRate) -> Money {
    rate.apply(target)
}

/// Calendar date of `now` in the business timezone.
#[must_use]
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}
