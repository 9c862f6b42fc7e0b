//! Payment ledger queries over an order's payment groups.
//!
//! The ledger never changes an amount. Cancelling a group only flips its
//! status, so everything here is a read over [`Order::payment_info`].

use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::order::{Order, PaymentGroup};
use crate::refund::RefundRate;
use crate::types::{Money, PaymentGroupStatus, PaymentId};

/// What a cancellation covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "paymentId", rename_all = "snake_case")]
pub enum CancelScope {
    /// The whole order.
    All,
    /// A single additional-order payment group.
    One(PaymentId),
}

impl CancelScope {
    /// Returns `true` for whole-order cancellation.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl std::fmt::Display for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::One(id) => write!(f, "one:{id}"),
        }
    }
}

/// Refund owed on one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRefund {
    pub payment_id: PaymentId,
    /// Amount subject to the refund rate (item total, plus the fee if carried).
    pub target: Money,
    /// `floor(target × rate)`.
    pub refund: Money,
    pub includes_delivery_fee: bool,
}

/// Per-group refunds for a scope, in the order the gateway is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPlan {
    pub scope: CancelScope,
    pub rate: RefundRate,
    pub refunds: Vec<PlannedRefund>,
}

impl RefundPlan {
    /// Sum of the per-group refunds.
    #[must_use]
    pub fn total_refund(&self) -> Money {
        self.refunds.iter().map(|r| r.refund).sum()
    }

    /// Sum of the amounts the rate was applied to.
    #[must_use]
    pub fn total_target(&self) -> Money {
        self.refunds.iter().map(|r| r.target).sum()
    }

    /// Nothing left to cancel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refunds.is_empty()
    }
}

/// Totals over an order's payment groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub active_total: Money,
    pub cancelled_total: Money,
    pub points_used: Money,
    pub group_count: usize,
    pub active_count: usize,
}

/// Read-only view over an order's payment groups.
#[derive(Debug, Clone, Copy)]
pub struct Ledger<'a> {
    order: &'a Order,
}

impl<'a> Ledger<'a> {
    /// Wrap an order.
    #[must_use]
    pub const fn new(order: &'a Order) -> Self {
        Self { order }
    }

    /// Groups that still hold a charge, in creation order.
    pub fn active_groups(&self) -> impl Iterator<Item = &'a PaymentGroup> + use<'a> {
        self.order.payment_info.iter().filter(|g| g.is_active())
    }

    /// Whether any group still holds a charge.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active_groups().next().is_some()
    }

    /// Sum of active group amounts. This is the order's effective total.
    #[must_use]
    pub fn active_total(&self) -> Money {
        self.active_groups().map(|g| g.amount).sum()
    }

    /// Totals for display and reconciliation.
    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        let groups = &self.order.payment_info;
        LedgerSummary {
            active_total: self.active_total(),
            cancelled_total: groups
                .iter()
                .filter(|g| g.status == PaymentGroupStatus::Cancelled)
                .map(|g| g.amount)
                .sum(),
            points_used: self.active_groups().map(|g| g.points_used).sum(),
            group_count: groups.len(),
            active_count: self.active_groups().count(),
        }
    }

    /// Plan the refunds for `scope` at `rate`.
    ///
    /// `All` covers every active group in creation order. The delivery fee is
    /// refunded together with the group that was charged for it, and only
    /// while that group is still active, so a retried cancellation never
    /// refunds the fee twice.
    ///
    /// `One` covers exactly the named additional group, fee excluded. A group
    /// that is already cancelled yields an empty plan.
    ///
    /// # Errors
    ///
    /// - [`OrderError::PaymentGroupNotFound`] if the group is not on this order.
    /// - [`OrderError::PreconditionNotMet`] if the group carries the delivery
    ///   fee (the initial purchase can only be cancelled with the whole order)
    ///   or its charge failed, or if a refund would be negative or exceed
    ///   its target.
    pub fn plan_refund(&self, scope: &CancelScope, rate: RefundRate) -> Result<RefundPlan, OrderError> {
        let refunds = match scope {
            CancelScope::All => self
                .active_groups()
                .map(|group| {
                    let target = if group.carries_delivery_fee {
                        group.amount
                    } else {
                        group.item_total()
                    };
                    PlannedRefund {
                        payment_id: group.id.clone(),
                        target,
                        refund: rate.apply(target),
                        includes_delivery_fee: group.carries_delivery_fee,
                    }
                })
                .collect(),
            CancelScope::One(payment_id) => {
                let group = self
                    .order
                    .group(payment_id)
                    .ok_or_else(|| OrderError::PaymentGroupNotFound(payment_id.clone()))?;
                if group.carries_delivery_fee {
                    return Err(OrderError::precondition(
                        "the initial payment can only be cancelled with the whole order",
                    ));
                }
                match group.status {
                    PaymentGroupStatus::Cancelled => Vec::new(),
                    PaymentGroupStatus::Failed => {
                        return Err(OrderError::precondition(format!(
                            "payment {payment_id} was never charged"
                        )));
                    }
                    PaymentGroupStatus::Paid => {
                        let target = group.item_total();
                        vec![PlannedRefund {
                            payment_id: group.id.clone(),
                            target,
                            refund: rate.apply(target),
                            includes_delivery_fee: false,
                        }]
                    }
                }
            }
        };

        if let Some(bad) = refunds
            .iter()
            .find(|r| r.refund.is_negative() || r.refund > r.target)
        {
            return Err(OrderError::precondition(format!(
                "refund {} for payment {} is outside 0..={}",
                bad.refund, bad.payment_id, bad.target
            )));
        }

        Ok(RefundPlan {
            scope: scope.clone(),
            rate,
            refunds,
        })
    }

    /// Check the ledger invariants.
    ///
    /// - Active group amounts equal the items they paid for, plus the fee
    ///   on the fee-carrying group.
    /// - At most one group carries the delivery fee, and it is the first.
    /// - Every item points at a group on this order.
    /// - No group amount is negative.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::PreconditionNotMet`] describing the first
    /// violation found.
    pub fn verify(&self) -> Result<(), OrderError> {
        let groups = &self.order.payment_info;

        let carriers: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.carries_delivery_fee)
            .map(|(i, _)| i)
            .collect();
        if carriers.len() > 1 || carriers.first().is_some_and(|&i| i != 0) {
            return Err(OrderError::precondition(
                "delivery fee must be carried by the first payment group only",
            ));
        }

        if let Some(item) = self
            .order
            .items
            .iter()
            .find(|item| self.order.group(&item.payment_id).is_none())
        {
            return Err(OrderError::precondition(format!(
                "item {} references unknown payment {}",
                item.product_id, item.payment_id
            )));
        }

        if let Some(group) = groups
            .iter()
            .find(|g| g.amount.is_negative() || g.delivery_fee.is_negative() || g.points_used.is_negative())
        {
            return Err(OrderError::precondition(format!(
                "payment {} has a negative amount",
                group.id
            )));
        }

        for group in groups {
            let items: Money = self.order.items_for(&group.id).map(|i| i.item_price).sum();
            if items + group.delivery_fee != group.amount {
                return Err(OrderError::precondition(format!(
                    "payment {} amount {} does not match its items {} plus fee {}",
                    group.id, group.amount, items, group.delivery_fee
                )));
            }
        }

        let expected: Money = self
            .active_groups()
            .map(|g| self.order.items_for(&g.id).map(|i| i.item_price).sum::<Money>() + g.delivery_fee)
            .sum();
        if expected != self.active_total() {
            return Err(OrderError::precondition(format!(
                "active total {} does not match effective total {expected}",
                self.active_total()
            )));
        }

        Ok(())
    }
}
