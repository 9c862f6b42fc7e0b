//! Domain error taxonomy for order operations.
//!
//! Every variant is returned to the caller as-is. The `Display` text is the
//! user-visible policy reason, so keep it plain.

use chrono::NaiveDate;

use crate::types::{OrderId, OrderStatus, PaymentId};

/// Errors produced by the order state machine, the ledger, and the
/// cancellation flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The payment group does not exist on this order.
    #[error("payment {0} not found on this order")]
    PaymentGroupNotFound(PaymentId),

    /// The target status is not reachable from the current one for this role.
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition {
        /// Current order status.
        from: OrderStatus,
        /// Requested order status.
        to: OrderStatus,
    },

    /// A role-specific precondition is not satisfied.
    #[error("{0}")]
    PreconditionNotMet(String),

    /// The refund rate for the delivery date has dropped to zero.
    #[error("past cancellation window: delivery on {delivery_date} is {days_left} day(s) away")]
    PastCancellationWindow {
        /// Scheduled delivery date of the order.
        delivery_date: NaiveDate,
        /// Whole days between today and the delivery date (negative if past).
        days_left: i64,
    },

    /// The gateway refused a cancellation partway through a request.
    ///
    /// Groups listed in `cancelled` were cancelled before the failure and stay
    /// cancelled. Partial success is a valid end state; re-invoking the
    /// cancellation only touches the groups in `remaining`.
    #[error("payment gateway cancellation failed ({message}); still active: {}", join_ids(.remaining))]
    GatewayCancellationFailed {
        /// Groups cancelled by this request before the failure.
        cancelled: Vec<PaymentId>,
        /// Groups still active, starting with the one that failed.
        remaining: Vec<PaymentId>,
        /// Gateway-provided error text.
        message: String,
    },

    /// The actor may not perform this operation on this order.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl OrderError {
    /// Shorthand for [`OrderError::PreconditionNotMet`].
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionNotMet(message.into())
    }

    /// Shorthand for [`OrderError::Unauthorized`].
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

fn join_ids(ids: &[PaymentId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(PaymentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_failure_names_remaining_groups() {
        let err = OrderError::GatewayCancellationFailed {
            cancelled: vec![PaymentId::new("tx-1")],
            remaining: vec![PaymentId::new("tx-2"), PaymentId::new("tx-3")],
            message: "ALREADY_REFUNDED_PAYMENT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "payment gateway cancellation failed (ALREADY_REFUNDED_PAYMENT); still active: tx-2, tx-3"
        );
    }

    #[test]
    fn test_window_error_surfaces_policy_reason() {
        let err = OrderError::PastCancellationWindow {
            delivery_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap_or_default(),
            days_left: 0,
        };
        assert!(err.to_string().starts_with("past cancellation window"));
    }
}
