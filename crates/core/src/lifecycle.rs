//! Order state machine.
//!
//! Every function here validates first and mutates last: on `Err` the order
//! is untouched. Callers persist the mutated order themselves.
//!
//! | from → to                         | buyer | seller (own store) | admin |
//! |-----------------------------------|-------|--------------------|-------|
//! | pending → preparing               |       | ✓                  | ✓     |
//! | preparing → shipping              |       | ✓                  | ✓     |
//! | shipping → completed              | ✓     | ✓                  | ✓     |
//! | pending, preparing → rejected     |       | ✓                  | ✓     |
//! | pending → cancelled_before_accept | ✓     |                    |       |
//! | preparing, shipping → cancelled   | ✓     |                    |       |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::ledger::{CancelScope, RefundPlan};
use crate::order::{AdditionalOrder, DeliveryDetails, Order, TrackingInfo};
use crate::refund::{RefundRate, days_until, refund_rate};
use crate::types::{
    Actor, CancelReason, OrderStatus, PaymentGroupStatus, PaymentId, PaymentStatus, Role,
};

/// A status change that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Whether `role` may move an order from `from` to `to`.
#[must_use]
pub const fn is_reachable(from: OrderStatus, to: OrderStatus, role: Role) -> bool {
    use OrderStatus::{Cancelled, CancelledBeforeAccept, Completed, Pending, Preparing, Rejected, Shipping};

    let store_side = matches!(role, Role::Seller | Role::Admin);
    match (from, to) {
        (Pending, Preparing) | (Preparing, Shipping) | (Pending | Preparing, Rejected) => store_side,
        (Shipping, Completed) => true,
        (Pending, CancelledBeforeAccept) | (Preparing | Shipping, Cancelled) => {
            matches!(role, Role::Buyer)
        }
        _ => false,
    }
}

/// The cancellation status a role would move an order to from `from`.
///
/// # Errors
///
/// Returns [`OrderError::InvalidTransition`] if the role cannot cancel from
/// the current status.
pub fn cancellation_target(from: OrderStatus, role: Role) -> Result<OrderStatus, OrderError> {
    let to = match role {
        Role::Buyer if matches!(from, OrderStatus::Pending) => OrderStatus::CancelledBeforeAccept,
        Role::Buyer => OrderStatus::Cancelled,
        Role::Seller | Role::Admin => OrderStatus::Rejected,
    };
    if is_reachable(from, to, role) {
        Ok(to)
    } else {
        Err(OrderError::InvalidTransition { from, to })
    }
}

/// Check that the actor is a party to the order.
///
/// # Errors
///
/// Returns [`OrderError::Unauthorized`] for another buyer or another store.
pub fn ensure_party(order: &Order, actor: &Actor) -> Result<(), OrderError> {
    let allowed = match actor.role {
        Role::Buyer => actor.is_buyer(&order.uid),
        Role::Seller => actor.is_seller_of(&order.store_id),
        Role::Admin => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(OrderError::unauthorized(format!(
            "{actor} is not a party to order {}",
            order.id
        )))
    }
}

/// Move an order forward along the fulfilment path.
///
/// Cancellation statuses are not reachable here; they go through the
/// cancellation flow so the gateway is refunded first.
///
/// # Errors
///
/// - [`OrderError::Unauthorized`] if the actor is not a party to the order.
/// - [`OrderError::InvalidTransition`] if `target` is not reachable for the
///   actor's role, or is a cancellation status.
/// - [`OrderError::PreconditionNotMet`] if accepting an unpaid order, or
///   shipping a parcel order without complete tracking info.
pub fn advance(
    order: &mut Order,
    target: OrderStatus,
    actor: &Actor,
    tracking: Option<TrackingInfo>,
) -> Result<StatusChange, OrderError> {
    ensure_party(order, actor)?;

    let from = order.order_status;
    if target.is_cancellation() || !is_reachable(from, target, actor.role) {
        return Err(OrderError::InvalidTransition { from, to: target });
    }

    match (from, target) {
        (OrderStatus::Pending, OrderStatus::Preparing) => {
            if order.payment_status != PaymentStatus::Paid || !order.ledger().has_active() {
                return Err(OrderError::precondition(
                    "order cannot be accepted before payment is confirmed",
                ));
            }
        }
        (OrderStatus::Preparing, OrderStatus::Shipping) => {
            if let DeliveryDetails::Parcel { tracking: slot, .. } = &mut order.delivery {
                let info = tracking
                    .filter(TrackingInfo::is_complete)
                    .ok_or_else(|| {
                        OrderError::precondition(
                            "parcel orders need a carrier and tracking number to ship",
                        )
                    })?;
                *slot = Some(info);
            }
        }
        _ => {}
    }

    order.order_status = target;
    Ok(StatusChange { from, to: target })
}

/// A validated cancellation, ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCancellation {
    pub reason: CancelReason,
    /// Groups to refund, in gateway call order. Empty for a no-op.
    pub plan: RefundPlan,
    /// Status to apply once every group is refunded. `None` when the order
    /// status must not change (single-group scope, or already cancelled).
    pub target_status: Option<OrderStatus>,
}

/// A cancellation request as handed to [`prepare_cancellation`].
#[derive(Debug, Clone, Copy)]
pub struct CancellationInput<'a> {
    pub scope: &'a CancelScope,
    pub reason: &'a str,
    pub actor: &'a Actor,
    /// The buyer confirmed the refund-rate policy before cancelling an
    /// accepted order.
    pub acknowledged_refund_policy: bool,
    /// Today's date in the business timezone.
    pub today: NaiveDate,
}

/// Validate a cancellation and plan its refunds.
///
/// Checks, in order: the refund window for whole-order cancellation, the
/// reason, the target group, then the actor. Re-cancelling something already
/// cancelled yields an empty plan instead of an error, unless a late payment
/// left a charge on it; that charge is planned for a full refund and
/// `target_status` is the order's current status.
///
/// # Errors
///
/// - [`OrderError::PastCancellationWindow`] when the refund rate is zero.
/// - [`OrderError::PreconditionNotMet`] for a blank reason, an invalid target
///   group, or a buyer who has not acknowledged the refund policy.
/// - [`OrderError::PaymentGroupNotFound`] when the group is not on the order.
/// - [`OrderError::Unauthorized`] / [`OrderError::InvalidTransition`] when the
///   actor may not cancel this order now.
pub fn prepare_cancellation(
    order: &Order,
    input: CancellationInput<'_>,
) -> Result<PreparedCancellation, OrderError> {
    let ledger = order.ledger();
    let rate = cancellation_rate(order, input.today);
    let past_window = || OrderError::PastCancellationWindow {
        delivery_date: order.delivery_date,
        days_left: days_until(order.delivery_date, input.today),
    };

    // A cancelled order can still hold groups whose payment went through
    // late. Any party may settle them; the status stays where it is.
    if input.scope.is_all() && order.order_status.is_cancellation() {
        ensure_party(order, input.actor)?;
        let reason = parse_reason(input.reason)?;
        let plan = ledger.plan_refund(input.scope, rate)?;
        let target_status = (!plan.is_empty()).then_some(order.order_status);
        return Ok(PreparedCancellation {
            reason,
            plan,
            target_status,
        });
    }

    if input.scope.is_all() && !rate.allows_cancellation() {
        return Err(past_window());
    }

    let reason = parse_reason(input.reason)?;
    let plan = ledger.plan_refund(input.scope, rate)?;

    if !input.scope.is_all() {
        if plan.is_empty() {
            ensure_party(order, input.actor)?;
            return Ok(PreparedCancellation {
                reason,
                plan,
                target_status: None,
            });
        }
        if !rate.allows_cancellation() {
            return Err(past_window());
        }
    }

    let target = authorize_cancellation(order, input.actor, input.acknowledged_refund_policy)?;

    Ok(PreparedCancellation {
        reason,
        plan,
        target_status: input.scope.is_all().then_some(target),
    })
}

/// The refund rate a cancellation made `today` would use.
///
/// Charges left on an already cancelled order go back in full regardless of
/// the delivery date.
#[must_use]
pub fn cancellation_rate(order: &Order, today: NaiveDate) -> RefundRate {
    if order.order_status.is_cancellation() {
        RefundRate::FULL
    } else {
        refund_rate(order.delivery_date, today)
    }
}

fn parse_reason(raw: &str) -> Result<CancelReason, OrderError> {
    CancelReason::parse(raw).map_err(|e| OrderError::precondition(e.to_string()))
}

fn authorize_cancellation(
    order: &Order,
    actor: &Actor,
    acknowledged_refund_policy: bool,
) -> Result<OrderStatus, OrderError> {
    ensure_party(order, actor)?;
    let target = cancellation_target(order.order_status, actor.role)?;
    if actor.role == Role::Buyer && order.order_status.is_accepted() && !acknowledged_refund_policy {
        return Err(OrderError::precondition(
            "the refund policy must be acknowledged to cancel an accepted order",
        ));
    }
    Ok(target)
}

/// Flip one payment group to cancelled after the gateway confirmed it.
///
/// Returns `false` if the group was already cancelled.
///
/// # Errors
///
/// Returns [`OrderError::PaymentGroupNotFound`] if the group is not on the order.
pub fn mark_group_cancelled(order: &mut Order, payment_id: &PaymentId) -> Result<bool, OrderError> {
    let group = order
        .group_mut(payment_id)
        .ok_or_else(|| OrderError::PaymentGroupNotFound(payment_id.clone()))?;
    if group.status == PaymentGroupStatus::Cancelled {
        return Ok(false);
    }
    group.status = PaymentGroupStatus::Cancelled;
    Ok(true)
}

/// Apply the final status of a whole-order cancellation.
///
/// # Errors
///
/// Returns [`OrderError::PreconditionNotMet`] while any group still holds a
/// charge.
pub fn finish_cancellation(order: &mut Order, target: OrderStatus) -> Result<StatusChange, OrderError> {
    if order.ledger().has_active() {
        return Err(OrderError::precondition(
            "order still has active payments to refund",
        ));
    }
    let from = order.order_status;
    order.order_status = target;
    if order.payment_status == PaymentStatus::Paid {
        order.payment_status = PaymentStatus::Refunded;
    }
    Ok(StatusChange { from, to: target })
}

/// Payment notification from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    Paid,
    Failed,
    Cancelled,
}

/// Apply a gateway notification to a payment group.
///
/// The gateway owns group status, so this overwrites rather than validates,
/// except that a cancelled group is never revived. Returns `false` when
/// nothing changed.
///
/// # Errors
///
/// Returns [`OrderError::PaymentGroupNotFound`] if the group is not on the order.
pub fn apply_payment_event(
    order: &mut Order,
    payment_id: &PaymentId,
    event: PaymentEvent,
) -> Result<bool, OrderError> {
    let group = order
        .group_mut(payment_id)
        .ok_or_else(|| OrderError::PaymentGroupNotFound(payment_id.clone()))?;

    let next = match (group.status, event) {
        (PaymentGroupStatus::Cancelled, _) => PaymentGroupStatus::Cancelled,
        (_, PaymentEvent::Paid) => PaymentGroupStatus::Paid,
        (_, PaymentEvent::Failed) => PaymentGroupStatus::Failed,
        (_, PaymentEvent::Cancelled) => PaymentGroupStatus::Cancelled,
    };
    let group_changed = group.status != next;
    group.status = next;

    let before = order.payment_status;
    let has_active = order.ledger().has_active();
    order.payment_status = match (before, event) {
        (PaymentStatus::Unpaid | PaymentStatus::Failed, PaymentEvent::Paid) if has_active => {
            PaymentStatus::Paid
        }
        (PaymentStatus::Unpaid, PaymentEvent::Failed) => PaymentStatus::Failed,
        (PaymentStatus::Paid, PaymentEvent::Cancelled) if !has_active => PaymentStatus::Refunded,
        (status, _) => status,
    };

    Ok(group_changed || order.payment_status != before)
}

/// Open or close the order to additional purchases.
///
/// # Errors
///
/// - [`OrderError::Unauthorized`] unless the actor is the store or an admin.
/// - [`OrderError::PreconditionNotMet`] unless the order is being prepared.
pub fn set_allow_additional_order(order: &mut Order, actor: &Actor, allow: bool) -> Result<bool, OrderError> {
    if !actor.acts_for_store(&order.store_id) {
        return Err(OrderError::unauthorized(format!(
            "{actor} cannot change additional orders for order {}",
            order.id
        )));
    }
    if order.order_status != OrderStatus::Preparing {
        return Err(OrderError::precondition(format!(
            "additional orders can only be opened while preparing (order is {})",
            order.order_status
        )));
    }
    let changed = order.allow_additional_order != allow;
    order.allow_additional_order = allow;
    Ok(changed)
}

/// Attach an additional purchase as a new payment group.
///
/// # Errors
///
/// - [`OrderError::Unauthorized`] unless the actor is the order's buyer.
/// - [`OrderError::PreconditionNotMet`] unless the order is being prepared
///   with additional orders allowed, the purchase has items, and its
///   transaction id is new to the order. Amounts are checked as in
///   [`Order::from_checkout`].
pub fn append_additional_order(
    order: &mut Order,
    actor: &Actor,
    additional: AdditionalOrder,
) -> Result<PaymentId, OrderError> {
    if !actor.is_buyer(&order.uid) {
        return Err(OrderError::unauthorized(format!(
            "only the buyer can add to order {}",
            order.id
        )));
    }
    if order.order_status != OrderStatus::Preparing || !order.allow_additional_order {
        return Err(OrderError::precondition(
            "this order is not accepting additional orders",
        ));
    }
    if additional.lines.is_empty() {
        return Err(OrderError::precondition(
            "an additional order needs at least one item",
        ));
    }
    if order.group(&additional.payment.transaction_id).is_some() {
        return Err(OrderError::precondition(format!(
            "payment {} is already recorded on this order",
            additional.payment.transaction_id
        )));
    }

    let (group, items) = additional.into_group()?;
    let id = group.id.clone();
    order.payment_info.push(group);
    order.items.extend(items);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ChargeOutcome;
    use crate::order::fixtures::{checkout, date, line, order, parcel, quick, receipt};
    use crate::types::{Money, StoreId, UserId};

    fn seller() -> Actor {
        Actor::seller(&StoreId::new("store-1"))
    }

    fn buyer() -> Actor {
        Actor::buyer(&UserId::new("buyer-1"))
    }

    fn preparing() -> Order {
        let mut order = order();
        advance(&mut order, OrderStatus::Preparing, &seller(), None).unwrap_or_else(|e| panic!("{e}"));
        order
    }

    fn tracking() -> TrackingInfo {
        TrackingInfo {
            carrier: "CJ대한통운".to_string(),
            tracking_number: "6894-1234-5678".to_string(),
        }
    }

    fn input<'a>(scope: &'a CancelScope, actor: &'a Actor, today: NaiveDate) -> CancellationInput<'a> {
        CancellationInput {
            scope,
            reason: "단순 변심",
            actor,
            acknowledged_refund_policy: true,
            today,
        }
    }

    #[test]
    fn test_role_table() {
        use OrderStatus::*;
        assert!(is_reachable(Pending, Preparing, Role::Seller));
        assert!(!is_reachable(Pending, Preparing, Role::Buyer));
        assert!(is_reachable(Shipping, Completed, Role::Buyer));
        assert!(!is_reachable(Pending, Shipping, Role::Admin));
        assert!(!is_reachable(Shipping, Rejected, Role::Seller));
        assert!(is_reachable(Pending, CancelledBeforeAccept, Role::Buyer));
        assert!(!is_reachable(Pending, Cancelled, Role::Buyer));
        for terminal in [Completed, Rejected, Cancelled, CancelledBeforeAccept] {
            for to in OrderStatus::ALL {
                for role in [Role::Buyer, Role::Seller, Role::Admin] {
                    assert!(!is_reachable(terminal, to, role));
                }
            }
        }
    }

    #[test]
    fn test_happy_path_to_review_eligible() {
        let mut order = preparing();
        advance(&mut order, OrderStatus::Shipping, &seller(), None).unwrap_or_else(|e| panic!("{e}"));
        assert!(!order.is_review_eligible());
        let change = advance(&mut order, OrderStatus::Completed, &buyer(), None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(change.from, OrderStatus::Shipping);
        assert!(order.is_review_eligible());
    }

    #[test]
    fn test_other_store_is_unauthorized() {
        let mut order = order();
        let other = Actor::seller(&StoreId::new("store-2"));
        assert!(matches!(
            advance(&mut order, OrderStatus::Preparing, &other, None),
            Err(OrderError::Unauthorized(_))
        ));
        assert_eq!(order.order_status, OrderStatus::Pending);
    }

    #[test]
    fn test_cancellation_status_is_not_advanceable() {
        let mut order = order();
        assert_eq!(
            advance(&mut order, OrderStatus::Rejected, &seller(), None),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Rejected
            })
        );
    }

    #[test]
    fn test_accept_requires_payment() {
        let mut order = order();
        order.payment_status = PaymentStatus::Unpaid;
        assert!(matches!(
            advance(&mut order, OrderStatus::Preparing, &seller(), None),
            Err(OrderError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn test_parcel_shipping_writes_tracking_atomically() {
        let mut order = Order::from_checkout(checkout(parcel())).unwrap_or_else(|e| panic!("{e}"));
        advance(&mut order, OrderStatus::Preparing, &seller(), None).unwrap_or_else(|e| panic!("{e}"));

        let blank = TrackingInfo {
            carrier: "CJ대한통운".to_string(),
            tracking_number: " ".to_string(),
        };
        assert!(matches!(
            advance(&mut order, OrderStatus::Shipping, &seller(), Some(blank)),
            Err(OrderError::PreconditionNotMet(_))
        ));
        assert_eq!(order.order_status, OrderStatus::Preparing);
        assert!(order.delivery.tracking().is_none());

        advance(&mut order, OrderStatus::Shipping, &seller(), Some(tracking())).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.order_status, OrderStatus::Shipping);
        assert_eq!(order.delivery.tracking(), Some(&tracking()));
    }

    #[test]
    fn test_prepare_full_cancellation_after_acceptance() {
        let order = preparing();
        let actor = buyer();
        let prepared = prepare_cancellation(&order, input(&CancelScope::All, &actor, date(2026, 10, 2)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(prepared.target_status, Some(OrderStatus::Cancelled));
        assert_eq!(prepared.plan.total_refund(), Money::won(50_000));
    }

    #[test]
    fn test_buyer_must_acknowledge_policy_after_acceptance() {
        let order = preparing();
        let actor = buyer();
        let mut request = input(&CancelScope::All, &actor, date(2026, 10, 2));
        request.acknowledged_refund_policy = false;
        assert!(matches!(
            prepare_cancellation(&order, request),
            Err(OrderError::PreconditionNotMet(_))
        ));

        // Before acceptance no acknowledgment is needed.
        let pending = crate::order::fixtures::order();
        let prepared = prepare_cancellation(&pending, request).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(prepared.target_status, Some(OrderStatus::CancelledBeforeAccept));
    }

    #[test]
    fn test_window_is_checked_before_reason() {
        let order = order();
        let actor = buyer();
        let mut request = input(&CancelScope::All, &actor, date(2026, 10, 5));
        request.reason = "";
        assert!(matches!(
            prepare_cancellation(&order, request),
            Err(OrderError::PastCancellationWindow { days_left: 0, .. })
        ));
    }

    #[test]
    fn test_blank_reason_is_rejected() {
        let order = order();
        let actor = seller();
        let mut request = input(&CancelScope::All, &actor, date(2026, 10, 1));
        request.reason = "  ";
        assert!(matches!(
            prepare_cancellation(&order, request),
            Err(OrderError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn test_seller_cannot_reject_once_shipping() {
        let mut order = preparing();
        advance(&mut order, OrderStatus::Shipping, &seller(), None).unwrap_or_else(|e| panic!("{e}"));
        let actor = seller();
        assert_eq!(
            prepare_cancellation(&order, input(&CancelScope::All, &actor, date(2026, 10, 1))),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Shipping,
                to: OrderStatus::Rejected
            })
        );
    }

    #[test]
    fn test_finish_cancellation_requires_all_groups_refunded() {
        let mut order = order();
        let initial = order.payment_info[0].id.clone();
        assert!(finish_cancellation(&mut order, OrderStatus::Rejected).is_err());

        assert_eq!(mark_group_cancelled(&mut order, &initial), Ok(true));
        assert_eq!(mark_group_cancelled(&mut order, &initial), Ok(false));
        finish_cancellation(&mut order, OrderStatus::Rejected).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.order_status, OrderStatus::Rejected);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);

        // Cancelling again is a no-op.
        let actor = seller();
        let prepared = prepare_cancellation(&order, input(&CancelScope::All, &actor, date(2026, 10, 9)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(prepared.plan.is_empty());
        assert_eq!(prepared.target_status, None);
    }

    #[test]
    fn test_additional_order_lifecycle() {
        let mut order = preparing();
        let extra = AdditionalOrder {
            lines: vec![line("kimbap", 10_000)],
            payment: receipt("tx-add"),
        };

        assert!(append_additional_order(&mut order, &buyer(), extra.clone()).is_err());
        assert!(matches!(
            set_allow_additional_order(&mut order, &buyer(), true),
            Err(OrderError::Unauthorized(_))
        ));
        assert_eq!(set_allow_additional_order(&mut order, &seller(), true), Ok(true));

        let id = append_additional_order(&mut order, &buyer(), extra.clone()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.payment_info.len(), 2);
        assert!(order.items_for(&id).all(|item| item.is_add_item));
        assert!(!order.payment_info[1].carries_delivery_fee);
        assert_eq!(order.effective_total(), Money::won(60_000));
        assert!(order.ledger().verify().is_ok());

        // Same transaction twice is refused.
        assert!(append_additional_order(&mut order, &buyer(), extra).is_err());
    }

    #[test]
    fn test_single_group_cancellation_keeps_status() {
        let mut order = preparing();
        set_allow_additional_order(&mut order, &seller(), true).unwrap_or_else(|e| panic!("{e}"));
        let id = append_additional_order(
            &mut order,
            &buyer(),
            AdditionalOrder {
                lines: vec![line("kimbap", 10_000)],
                payment: receipt("tx-add"),
            },
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let actor = buyer();
        let scope = CancelScope::One(id.clone());
        let prepared = prepare_cancellation(&order, input(&scope, &actor, date(2026, 10, 2)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(prepared.target_status, None);
        assert_eq!(prepared.plan.total_refund(), Money::won(10_000));

        mark_group_cancelled(&mut order, &id).unwrap_or_else(|e| panic!("{e}"));
        let again = prepare_cancellation(&order, input(&scope, &actor, date(2026, 10, 5)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(again.plan.is_empty());
    }

    #[test]
    fn test_gateway_events_are_idempotent() {
        let mut order = order();
        let initial = order.payment_info[0].id.clone();

        assert_eq!(apply_payment_event(&mut order, &initial, PaymentEvent::Paid), Ok(false));
        assert_eq!(apply_payment_event(&mut order, &initial, PaymentEvent::Cancelled), Ok(true));
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert_eq!(apply_payment_event(&mut order, &initial, PaymentEvent::Cancelled), Ok(false));

        // A late "paid" never revives a cancelled group.
        assert_eq!(apply_payment_event(&mut order, &initial, PaymentEvent::Paid), Ok(false));
        assert_eq!(order.payment_info[0].status, PaymentGroupStatus::Cancelled);
    }

    #[test]
    fn test_late_payment_on_cancelled_order_can_be_settled() {
        let mut failed = checkout(quick());
        failed.payment.outcome = ChargeOutcome::Failed;
        let mut order = Order::from_checkout(failed).unwrap_or_else(|e| panic!("{e}"));
        let initial = order.payment_info[0].id.clone();

        let actor = buyer();
        let first = prepare_cancellation(&order, input(&CancelScope::All, &actor, date(2026, 10, 2)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(first.plan.is_empty());
        let target = first.target_status.unwrap_or(OrderStatus::Pending);
        finish_cancellation(&mut order, target).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.order_status, OrderStatus::CancelledBeforeAccept);

        // The retried charge lands after the order was cancelled.
        assert_eq!(apply_payment_event(&mut order, &initial, PaymentEvent::Paid), Ok(true));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.effective_total(), Money::won(50_000));

        // Past the window, by the store: still refunded in full.
        let store = seller();
        let settle = prepare_cancellation(&order, input(&CancelScope::All, &store, date(2026, 10, 9)))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(settle.plan.rate, RefundRate::FULL);
        assert_eq!(settle.plan.total_refund(), Money::won(50_000));
        assert_eq!(settle.target_status, Some(OrderStatus::CancelledBeforeAccept));

        mark_group_cancelled(&mut order, &initial).unwrap_or_else(|e| panic!("{e}"));
        finish_cancellation(&mut order, OrderStatus::CancelledBeforeAccept).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.order_status, OrderStatus::CancelledBeforeAccept);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert!(!order.ledger().has_active());

        // Outsiders still cannot touch it.
        let mut stray = order.clone();
        apply_payment_event(&mut stray, &initial, PaymentEvent::Paid).unwrap_or_else(|e| panic!("{e}"));
        let other = Actor::buyer(&UserId::new("buyer-2"));
        assert!(matches!(
            prepare_cancellation(&stray, input(&CancelScope::All, &other, date(2026, 10, 9))),
            Err(OrderError::Unauthorized(_))
        ));
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Add,
        CancelNewest,
        HaltedCancelAll,
        CancelAll,
        Webhook(PaymentEvent),
    }

    const STEPS: [Step; 7] = [
        Step::Add,
        Step::CancelNewest,
        Step::HaltedCancelAll,
        Step::CancelAll,
        Step::Webhook(PaymentEvent::Paid),
        Step::Webhook(PaymentEvent::Failed),
        Step::Webhook(PaymentEvent::Cancelled),
    ];

    /// Run one step the way the service would, with the gateway agreeing to
    /// every refund except where the step says it halts.
    fn run_step(order: &mut Order, step: Step, added: &mut u32) -> Result<(), OrderError> {
        let actor = buyer();
        let today = date(2026, 10, 2);
        let newest = order
            .payment_info
            .last()
            .map(|group| group.id.clone())
            .unwrap_or_else(|| PaymentId::new("none"));
        match step {
            Step::Add => {
                *added += 1;
                let extra = AdditionalOrder {
                    lines: vec![line("kimbap", 10_000)],
                    payment: receipt(&format!("tx-add-{added}")),
                };
                append_additional_order(order, &actor, extra).map(drop)
            }
            Step::CancelNewest => {
                let scope = CancelScope::One(newest);
                let prepared = prepare_cancellation(order, input(&scope, &actor, today))?;
                for refund in &prepared.plan.refunds {
                    mark_group_cancelled(order, &refund.payment_id)?;
                }
                Ok(())
            }
            Step::HaltedCancelAll => {
                let prepared = prepare_cancellation(order, input(&CancelScope::All, &actor, today))?;
                if let Some(refund) = prepared.plan.refunds.first() {
                    mark_group_cancelled(order, &refund.payment_id)?;
                }
                Ok(())
            }
            Step::CancelAll => {
                let prepared = prepare_cancellation(order, input(&CancelScope::All, &actor, today))?;
                for refund in &prepared.plan.refunds {
                    mark_group_cancelled(order, &refund.payment_id)?;
                }
                if let Some(target) = prepared.target_status {
                    finish_cancellation(order, target)?;
                }
                Ok(())
            }
            Step::Webhook(event) => apply_payment_event(order, &newest, event).map(drop),
        }
    }

    fn check_invariants(order: &Order, before: &Order, trail: &[Step]) {
        assert!(order.ledger().verify().is_ok(), "ledger broken after {trail:?}");

        for group in before.payment_info.iter().filter(|g| g.status == PaymentGroupStatus::Cancelled) {
            assert_eq!(
                order.group(&group.id).map(|g| g.status),
                Some(PaymentGroupStatus::Cancelled),
                "group {} revived after {trail:?}",
                group.id
            );
        }

        if order.order_status.is_cancellation() && order.ledger().has_active() {
            let admin = Actor::admin("ops-1");
            let settle = prepare_cancellation(order, input(&CancelScope::All, &admin, date(2026, 10, 9)))
                .unwrap_or_else(|e| panic!("stranded charge after {trail:?}: {e}"));
            assert_eq!(settle.plan.total_refund(), order.effective_total(), "after {trail:?}");
        }
    }

    #[test]
    fn test_ledger_invariants_hold_for_every_step_sequence() {
        let mut start = preparing();
        set_allow_additional_order(&mut start, &seller(), true).unwrap_or_else(|e| panic!("{e}"));

        let mut sequences: Vec<Vec<Step>> = vec![Vec::new()];
        for _ in 0..4 {
            sequences = sequences
                .into_iter()
                .flat_map(|prefix| {
                    STEPS.iter().map(move |step| {
                        let mut next = prefix.clone();
                        next.push(*step);
                        next
                    })
                })
                .collect();
        }
        assert_eq!(sequences.len(), 7 * 7 * 7 * 7);

        for sequence in &sequences {
            let mut order = start.clone();
            let mut added = 0;
            for (done, step) in sequence.iter().enumerate() {
                let before = order.clone();
                let trail = sequence.get(..=done).unwrap_or_default();
                if run_step(&mut order, *step, &mut added).is_err() {
                    assert_eq!(order, before, "failed step mutated the order after {trail:?}");
                }
                check_invariants(&order, &before, trail);
            }
        }
    }

    #[test]
    fn test_failed_payment_can_later_be_paid() {
        let mut order = order();
        let initial = order.payment_info[0].id.clone();
        order.payment_status = PaymentStatus::Unpaid;
        order.payment_info[0].status = PaymentGroupStatus::Failed;

        apply_payment_event(&mut order, &initial, PaymentEvent::Failed).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        apply_payment_event(&mut order, &initial, PaymentEvent::Paid).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(order.ledger().has_active());
    }
}
