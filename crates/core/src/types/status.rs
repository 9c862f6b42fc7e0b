//! Status enums for orders and payment groups.

use serde::{Deserialize, Serialize};

/// Order lifecycle status (`orderStatus`).
///
/// ```text
/// pending ──► preparing ──► shipping ──► completed
///    │            │             │
///    │            ├─► rejected  └─► cancelled
///    ├─► rejected └─► cancelled
///    └─► cancelled_before_accept
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid (or awaiting payment), not yet accepted by the seller.
    #[default]
    Pending,
    /// Accepted by the seller and being prepared.
    Preparing,
    /// Handed to delivery.
    Shipping,
    /// Delivered and confirmed.
    Completed,
    /// Cancelled by the seller (or the platform on the seller's behalf).
    Rejected,
    /// Cancelled by the buyer after the seller accepted.
    Cancelled,
    /// Cancelled by the buyer before the seller accepted.
    CancelledBeforeAccept,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Preparing,
        Self::Shipping,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
        Self::CancelledBeforeAccept,
    ];

    /// Returns `true` if no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Cancelled | Self::CancelledBeforeAccept
        )
    }

    /// Returns `true` for the three cancellation outcomes.
    #[must_use]
    pub const fn is_cancellation(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::CancelledBeforeAccept
        )
    }

    /// Returns `true` once the seller has accepted the order.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Preparing | Self::Shipping | Self::Completed)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Shipping => "shipping",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::CancelledBeforeAccept => "cancelled_before_accept",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Aggregate payment status of an order (`paymentStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single payment group.
///
/// A group only ever moves to `Cancelled`; it is never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_group_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentGroupStatus {
    #[default]
    Paid,
    Cancelled,
    Failed,
}

impl std::fmt::Display for PaymentGroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How an order reaches the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "delivery_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// Same-day courier (퀵).
    Quick,
    /// Parcel carrier (택배); shipping requires a tracking number.
    Parcel,
    /// Buyer picks the order up at the store.
    Pickup,
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Parcel => write!(f, "parcel"),
            Self::Pickup => write!(f, "pickup"),
        }
    }
}

impl std::str::FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "parcel" => Ok(Self::Parcel),
            "pickup" => Ok(Self::Pickup),
            _ => Err(format!("invalid delivery method: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>(), Ok(status));
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Preparing.is_terminal());
        assert!(!OrderStatus::Shipping.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::CancelledBeforeAccept.is_terminal());
    }

    #[test]
    fn test_order_status_serde_names() {
        let json = serde_json::to_string(&OrderStatus::CancelledBeforeAccept).unwrap_or_default();
        assert_eq!(json, "\"cancelled_before_accept\"");
    }
}
