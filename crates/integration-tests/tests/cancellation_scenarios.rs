//! Whole-order and single-group cancellation walked across calendar days.

use dosirak_core::{CancelScope, Money, OrderError, OrderStatus, PaymentGroupStatus, PaymentId, PaymentStatus, RefundRate};
use dosirak_integration_tests::testing::additional_order;
use dosirak_integration_tests::{FIRST_PAYMENT, Marketplace, buyer, order_id, seller};
use dosirak_server::services::{CancelOrder, ServiceError};

fn cancel(scope: CancelScope) -> CancelOrder {
    CancelOrder {
        scope,
        reason: "일정이 바뀌었어요".to_string(),
        acknowledged_refund_policy: true,
    }
}

#[tokio::test]
async fn test_accepted_order_cancelled_three_days_out_refunds_in_full() {
    let market = Marketplace::with_sample_order();

    // Placed 2026-10-01 for 10-05; the store accepts the same day.
    market
        .on(2026, 10, 1)
        .advance_status(&order_id(), &seller(), OrderStatus::Preparing, None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let result = market
        .on(2026, 10, 2)
        .cancel(&order_id(), &buyer(), &cancel(CancelScope::All))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(result.rate, RefundRate::FULL);
    assert_eq!(result.refund_amount, Money::won(50_000));
    assert_eq!(result.order_status, OrderStatus::Cancelled);
    assert_eq!(result.payment_status, PaymentStatus::Refunded);

    let calls = market.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls.first().map(|c| c.refund_amount), Some(Money::won(50_000)));

    let order = market.order().await;
    assert_eq!(order.order_status, OrderStatus::Cancelled);
    assert!(order.payment_info.iter().all(|g| g.status == PaymentGroupStatus::Cancelled));
}

#[tokio::test]
async fn test_cancelling_only_the_additional_purchase() {
    let market = Marketplace::with_sample_order();
    let day_one = market.on(2026, 10, 1);

    day_one
        .advance_status(&order_id(), &seller(), OrderStatus::Preparing, None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    day_one
        .set_allow_additional_order(&order_id(), &seller(), true)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let extra = day_one
        .add_additional_order(&order_id(), &buyer(), additional_order("tx-extra", 10_000))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let before = market.order().await;
    assert_eq!(before.ledger().active_total(), Money::won(60_000));

    let result = market
        .on(2026, 10, 2)
        .cancel(&order_id(), &buyer(), &cancel(CancelScope::One(extra.clone())))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(result.refund_amount, Money::won(10_000));
    assert_eq!(result.cancelled_groups, vec![extra.clone()]);
    assert_eq!(result.order_status, OrderStatus::Preparing);

    let order = market.order().await;
    assert_eq!(order.order_status, OrderStatus::Preparing);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    let first = order.group(&PaymentId::new(FIRST_PAYMENT)).map(|g| g.status);
    let second = order.group(&extra).map(|g| g.status);
    assert_eq!(first, Some(PaymentGroupStatus::Paid));
    assert_eq!(second, Some(PaymentGroupStatus::Cancelled));
    assert_eq!(order.effective_total(), Money::won(50_000));

    let calls = market.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert!(calls.iter().all(|c| !c.scope_flags.whole_order && !c.scope_flags.includes_delivery_fee));
}

#[tokio::test]
async fn test_delivery_day_cancellation_is_refused_without_side_effects() {
    let market = Marketplace::with_sample_order();
    let before = market.order().await;

    let err = market
        .on(2026, 10, 5)
        .cancel(&order_id(), &buyer(), &cancel(CancelScope::All))
        .await
        .err();

    assert!(matches!(
        err,
        Some(ServiceError::Order(OrderError::PastCancellationWindow { days_left: 0, .. }))
    ));
    assert_eq!(market.gateway.call_count().await, 0);
    assert_eq!(market.order().await, before);
}

#[tokio::test]
async fn test_tiers_shrink_as_delivery_nears() {
    let cases = [
        ((2026, 10, 2), Money::won(50_000)),
        ((2026, 10, 3), Money::won(35_000)),
        ((2026, 10, 4), Money::won(25_000)),
    ];

    for ((y, m, d), expected) in cases {
        let market = Marketplace::with_sample_order();
        let quote = market
            .on(y, m, d)
            .refund_quote(&order_id(), &buyer(), &CancelScope::All)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(quote.total_refund, expected, "quote on {y}-{m}-{d}");

        let result = market
            .on(y, m, d)
            .cancel(&order_id(), &buyer(), &cancel(CancelScope::All))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result.refund_amount, expected, "cancel on {y}-{m}-{d}");
        assert_eq!(market.refunded().await, expected);
    }
}

#[tokio::test]
async fn test_seller_rejection_of_accepted_order_refunds_buyer() {
    let market = Marketplace::with_sample_order();
    let service = market.on(2026, 10, 2);

    service
        .advance_status(&order_id(), &seller(), OrderStatus::Preparing, None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let result = service
        .cancel(&order_id(), &seller(), &cancel(CancelScope::All))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(result.order_status, OrderStatus::Rejected);
    assert_eq!(result.refund_amount, Money::won(50_000));
    assert_eq!(market.order().await.payment_status, PaymentStatus::Refunded);
}
