//! Split-payment cancellation.
//!
//! A cancellation walks the refund plan one payment group at a time. Each
//! group the gateway cancels is persisted before the next call, so a failure
//! halfway leaves an order whose ledger matches what the gateway did. The
//! whole run happens under the order's lease.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use dosirak_core::lifecycle::{
    CancellationInput, cancellation_rate, ensure_party, finish_cancellation,
    mark_group_cancelled, prepare_cancellation,
};
use dosirak_core::refund::days_until;
use dosirak_core::{
    Actor, CancelScope, Money, OrderError, OrderId, OrderStatus, PaymentId, PaymentStatus,
    PlannedRefund, RefundRate,
};

use crate::feed::ChangeKind;
use crate::gateway::{CancelPaymentRequest, ScopeFlags};

use super::{OrderService, ServiceError};

/// A cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrder {
    pub scope: CancelScope,
    pub reason: String,
    #[serde(default)]
    pub acknowledged_refund_policy: bool,
}

/// What a cancellation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResult {
    pub order_id: OrderId,
    pub scope: CancelScope,
    pub rate: RefundRate,
    /// Cash returned by this request. Zero for a repeat.
    pub refund_amount: Money,
    /// Groups cancelled by this request, in gateway call order.
    pub cancelled_groups: Vec<PaymentId>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
}

/// What cancelling now would refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundQuote {
    pub order_id: OrderId,
    pub scope: CancelScope,
    pub rate: RefundRate,
    pub days_until_delivery: i64,
    pub refunds: Vec<PlannedRefund>,
    pub total_refund: Money,
    /// False once the delivery date is too close for any refund.
    pub cancellable: bool,
}

fn idempotency_key(order_id: &OrderId, payment_id: &PaymentId) -> String {
    format!("{order_id}:{payment_id}:cancel")
}

impl OrderService {
    /// Cancel a whole order or one payment group.
    ///
    /// # Errors
    ///
    /// Any [`OrderError`] from validation, or
    /// [`OrderError::GatewayCancellationFailed`] if the gateway refuses a
    /// group. Groups cancelled before the refusal stay cancelled.
    pub async fn cancel(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        request: &CancelOrder,
    ) -> Result<CancellationResult, ServiceError> {
        self.cancel_inner(order_id, actor, request, None).await
    }

    /// Cancel the whole order into a specific status.
    ///
    /// Used by the status endpoint: the requested status must be the one the
    /// actor's role cancels into.
    ///
    /// # Errors
    ///
    /// As [`OrderService::cancel`], plus [`OrderError::InvalidTransition`]
    /// when `target` is not the actor's cancellation status.
    pub async fn cancel_to(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        target: OrderStatus,
        reason: &str,
        acknowledged_refund_policy: bool,
    ) -> Result<CancellationResult, ServiceError> {
        let request = CancelOrder {
            scope: CancelScope::All,
            reason: reason.to_string(),
            acknowledged_refund_policy,
        };
        self.cancel_inner(order_id, actor, &request, Some(target)).await
    }

    #[instrument(
        skip(self, actor, request),
        fields(order_id = %order_id, scope = %request.scope, actor = %actor)
    )]
    async fn cancel_inner(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        request: &CancelOrder,
        expected_target: Option<OrderStatus>,
    ) -> Result<CancellationResult, ServiceError> {
        let lease = self.store().lease(order_id).await?;
        let mut order = self.load_leased(&lease).await?;

        let prepared = prepare_cancellation(
            &order,
            CancellationInput {
                scope: &request.scope,
                reason: &request.reason,
                actor,
                acknowledged_refund_policy: request.acknowledged_refund_policy,
                today: self.today(),
            },
        )?;

        if let (Some(expected), Some(target)) = (expected_target, prepared.target_status) {
            if expected != target {
                return Err(OrderError::InvalidTransition {
                    from: order.order_status,
                    to: expected,
                }
                .into());
            }
        }

        let plan = prepared.plan;
        if plan.is_empty() && prepared.target_status.is_none() {
            info!("nothing left to cancel");
            return Ok(CancellationResult {
                order_id: order.id.clone(),
                scope: plan.scope,
                rate: plan.rate,
                refund_amount: Money::ZERO,
                cancelled_groups: Vec::new(),
                order_status: order.order_status,
                payment_status: order.payment_status,
            });
        }

        let mut cancelled: Vec<PaymentId> = Vec::new();
        let mut refunded = Money::ZERO;

        for (index, refund) in plan.refunds.iter().enumerate() {
            let call = CancelPaymentRequest {
                transaction_id: refund.payment_id.clone(),
                reason: prepared.reason.clone(),
                refund_amount: refund.refund,
                scope_flags: ScopeFlags {
                    whole_order: plan.scope.is_all(),
                    includes_delivery_fee: refund.includes_delivery_fee,
                },
                idempotency_key: idempotency_key(&order.id, &refund.payment_id),
            };

            let failure = match self.gateway().cancel(&call).await {
                Ok(response) if response.success => None,
                Ok(response) => Some(
                    response
                        .error
                        .unwrap_or_else(|| "payment gateway declined the cancellation".to_string()),
                ),
                Err(err) => {
                    error!(error = %err, payment_id = %refund.payment_id, "gateway call failed");
                    Some(format!("payment gateway unavailable: {err}"))
                }
            };

            if let Some(message) = failure {
                let remaining: Vec<PaymentId> = plan
                    .refunds
                    .iter()
                    .skip(index)
                    .map(|r| r.payment_id.clone())
                    .collect();
                warn!(
                    payment_id = %refund.payment_id,
                    cancelled = cancelled.len(),
                    remaining = remaining.len(),
                    %message,
                    "cancellation halted"
                );
                if !cancelled.is_empty() {
                    self.publish(
                        &order,
                        ChangeKind::Cancelled {
                            rate: plan.rate,
                            refund_amount: refunded,
                            cancelled_groups: cancelled.clone(),
                        },
                    );
                }
                return Err(OrderError::GatewayCancellationFailed {
                    cancelled,
                    remaining,
                    message,
                }
                .into());
            }

            mark_group_cancelled(&mut order, &refund.payment_id)?;
            self.store().save(&lease, &order).await?;
            info!(payment_id = %refund.payment_id, refund = %refund.refund, "payment cancelled");
            cancelled.push(refund.payment_id.clone());
            refunded += refund.refund;
        }

        if let Some(target) = prepared.target_status {
            let change = finish_cancellation(&mut order, target)?;
            self.store().save(&lease, &order).await?;
            info!(from = %change.from, to = %change.to, "order cancelled");
        }

        self.publish(
            &order,
            ChangeKind::Cancelled {
                rate: plan.rate,
                refund_amount: refunded,
                cancelled_groups: cancelled.clone(),
            },
        );

        Ok(CancellationResult {
            order_id: order.id.clone(),
            scope: plan.scope,
            rate: plan.rate,
            refund_amount: refunded,
            cancelled_groups: cancelled,
            order_status: order.order_status,
            payment_status: order.payment_status,
        })
    }

    /// Preview the refund for cancelling now, without touching the order.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`], [`OrderError::Unauthorized`] for a
    /// non-party, or a ledger error for an invalid `ONE` target.
    #[instrument(skip(self, actor), fields(order_id = %order_id, scope = %scope))]
    pub async fn refund_quote(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        scope: &CancelScope,
    ) -> Result<RefundQuote, ServiceError> {
        let order = self.load(order_id).await?;
        ensure_party(&order, actor)?;

        let today = self.today();
        let rate = cancellation_rate(&order, today);
        let plan = order.ledger().plan_refund(scope, rate)?;

        Ok(RefundQuote {
            order_id: order.id.clone(),
            total_refund: plan.total_refund(),
            scope: plan.scope,
            rate,
            days_until_delivery: days_until(order.delivery_date, today),
            refunds: plan.refunds,
            cancellable: rate.allows_cancellation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dosirak_core::lifecycle::PaymentEvent;
    use dosirak_core::{AdditionalOrder, ChargeOutcome, UserId};

    use super::*;
    use crate::db::{MemoryOrderStore, OrderLease, OrderQuery, OrderStore, RepositoryError};
    use crate::services::GatewayNotification;
    use crate::testing::{
        ScriptedGateway, additional_order, clock_at, kst, sample_checkout, sample_order,
        service_with,
    };

    fn cancel_all(reason: &str) -> CancelOrder {
        CancelOrder {
            scope: CancelScope::All,
            reason: reason.to_string(),
            acknowledged_refund_policy: true,
        }
    }

    fn buyer() -> Actor {
        Actor::buyer(&UserId::new("buyer-1"))
    }

    async fn stored(store: &MemoryOrderStore, id: &str) -> dosirak_core::Order {
        store
            .get(&OrderId::new(id))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("order {id} missing"))
    }

    /// Preparing order with an extra 10,000 group `tx-add`.
    async fn preparing_with_additional(
        store: &MemoryOrderStore,
        service: &OrderService,
    ) {
        let seller = Actor::seller(&dosirak_core::StoreId::new("store-1"));
        let id = OrderId::new("order-1");
        service
            .advance_status(&id, &seller, OrderStatus::Preparing, None)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        service
            .set_allow_additional_order(&id, &seller, true)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let extra: AdditionalOrder = additional_order("tx-add", 10_000);
        service
            .add_additional_order(&id, &buyer(), extra)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stored(store, "order-1").await.payment_info.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_buyer_cancel_refunds_everything() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        // Four days out: full refund.
        let service = service_with(&store, &gateway, clock_at(2026, 10, 1));

        let result = service
            .cancel(&OrderId::new("order-1"), &buyer(), &cancel_all("changed my mind"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(result.rate, RefundRate::FULL);
        assert_eq!(result.refund_amount, Money::won(50_000));
        assert_eq!(result.order_status, OrderStatus::CancelledBeforeAccept);
        assert_eq!(result.payment_status, PaymentStatus::Refunded);

        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls.iter().all(|c| c.scope_flags.whole_order && c.scope_flags.includes_delivery_fee));

        let order = stored(&store, "order-1").await;
        assert!(!order.ledger().has_active());
    }

    #[tokio::test]
    async fn test_repeat_cancel_is_a_zero_refund_no_op() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        let service = service_with(&store, &gateway, clock_at(2026, 10, 1));
        let id = OrderId::new("order-1");

        service
            .cancel(&id, &buyer(), &cancel_all("changed my mind"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let again = service
            .cancel(&id, &buyer(), &cancel_all("changed my mind"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(again.refund_amount, Money::ZERO);
        assert!(again.cancelled_groups.is_empty());
        assert_eq!(gateway.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_cancelled_groups() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        let service = service_with(&store, &gateway, clock_at(2026, 10, 1));
        preparing_with_additional(&store, &service).await;
        gateway.refuse(&PaymentId::new("tx-add"), "card issuer unavailable").await;

        let id = OrderId::new("order-1");
        let err = service
            .cancel(&id, &buyer(), &cancel_all("plans changed"))
            .await
            .err();
        match err {
            Some(ServiceError::Order(OrderError::GatewayCancellationFailed {
                cancelled,
                remaining,
                message,
            })) => {
                assert_eq!(cancelled, vec![PaymentId::new("tx-sample-order-1")]);
                assert_eq!(remaining, vec![PaymentId::new("tx-add")]);
                assert!(message.contains("card issuer"));
            }
            other => panic!("expected gateway failure, got {other:?}"),
        }

        let order = stored(&store, "order-1").await;
        assert_eq!(order.order_status, OrderStatus::Preparing);
        assert_eq!(order.ledger().active_total(), Money::won(10_000));

        // Retry after the gateway recovers only touches the remaining group.
        gateway.allow(&PaymentId::new("tx-add")).await;
        let retry = service
            .cancel(&id, &buyer(), &cancel_all("plans changed"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(retry.cancelled_groups, vec![PaymentId::new("tx-add")]);
        assert_eq!(retry.order_status, OrderStatus::Cancelled);
        let fee_calls = gateway
            .calls()
            .await
            .iter()
            .filter(|c| c.scope_flags.includes_delivery_fee)
            .count();
        assert_eq!(fee_calls, 1);
    }

    #[tokio::test]
    async fn test_cancel_one_leaves_order_status() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        let service = service_with(&store, &gateway, clock_at(2026, 10, 1));
        preparing_with_additional(&store, &service).await;

        let result = service
            .cancel(
                &OrderId::new("order-1"),
                &buyer(),
                &CancelOrder {
                    scope: CancelScope::One(PaymentId::new("tx-add")),
                    reason: "too much food".to_string(),
                    acknowledged_refund_policy: true,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(result.refund_amount, Money::won(10_000));
        assert_eq!(result.order_status, OrderStatus::Preparing);
        assert_eq!(result.payment_status, PaymentStatus::Paid);
        let calls = gateway.calls().await;
        assert!(calls.iter().all(|c| !c.scope_flags.whole_order && !c.scope_flags.includes_delivery_fee));
    }

    #[tokio::test]
    async fn test_past_window_never_calls_gateway() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        // Delivery day.
        let service = service_with(&store, &gateway, clock_at(2026, 10, 5));

        let err = service
            .cancel(&OrderId::new("order-1"), &buyer(), &cancel_all("changed my mind"))
            .await
            .err();
        assert!(matches!(
            err,
            Some(ServiceError::Order(OrderError::PastCancellationWindow { .. }))
        ));
        assert_eq!(gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_to_rejects_mismatched_status() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        let service = service_with(&store, &gateway, clock_at(2026, 10, 1));

        let err = service
            .cancel_to(&OrderId::new("order-1"), &buyer(), OrderStatus::Rejected, "nope", true)
            .await
            .err();
        assert!(matches!(
            err,
            Some(ServiceError::Order(OrderError::InvalidTransition { .. }))
        ));
        assert_eq!(gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_charge_on_cancelled_order_is_refunded() {
        let mut checkout = sample_checkout("order-1");
        checkout.payment.outcome = ChargeOutcome::Failed;
        let order = dosirak_core::Order::from_checkout(checkout).unwrap_or_else(|e| panic!("{e}"));
        let store = MemoryOrderStore::with_orders([order]);
        let gateway = Arc::new(ScriptedGateway::new());
        let id = OrderId::new("order-1");
        let initial = PaymentId::new("tx-sample-order-1");

        let before = service_with(&store, &gateway, clock_at(2026, 10, 2));
        let first = before
            .cancel(&id, &buyer(), &cancel_all("changed my mind"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.order_status, OrderStatus::CancelledBeforeAccept);
        assert_eq!(gateway.call_count().await, 0);

        let changed = before
            .apply_gateway_event(&GatewayNotification {
                order_id: id.clone(),
                payment_id: initial.clone(),
                status: PaymentEvent::Paid,
            })
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(changed);
        assert_eq!(stored(&store, "order-1").await.effective_total(), Money::won(50_000));

        // Well past the delivery date, by the store.
        let later = service_with(&store, &gateway, clock_at(2026, 10, 9));
        let seller = Actor::seller(&dosirak_core::StoreId::new("store-1"));
        let quote = later
            .refund_quote(&id, &seller, &CancelScope::All)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(quote.total_refund, Money::won(50_000));

        let settled = later
            .cancel(&id, &seller, &cancel_all("payment arrived after cancellation"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(settled.rate, RefundRate::FULL);
        assert_eq!(settled.refund_amount, Money::won(50_000));
        assert_eq!(settled.cancelled_groups, vec![initial]);
        assert_eq!(settled.order_status, OrderStatus::CancelledBeforeAccept);
        assert_eq!(settled.payment_status, PaymentStatus::Refunded);
        assert_eq!(gateway.call_count().await, 1);

        let order = stored(&store, "order-1").await;
        assert!(!order.ledger().has_active());
        assert!(order.ledger().verify().is_ok());
    }

    /// Lease-bound reads and writes work while every other read fails, the
    /// way a drained connection pool would.
    struct DrainedPool(MemoryOrderStore);

    #[async_trait::async_trait]
    impl OrderStore for DrainedPool {
        async fn lease(&self, id: &OrderId) -> Result<OrderLease, RepositoryError> {
            self.0.lease(id).await
        }

        async fn get(&self, _id: &OrderId) -> Result<Option<dosirak_core::Order>, RepositoryError> {
            Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn get_leased(&self, lease: &OrderLease) -> Result<Option<dosirak_core::Order>, RepositoryError> {
            self.0.get_leased(lease).await
        }

        async fn list(&self, _query: &OrderQuery) -> Result<Vec<dosirak_core::Order>, RepositoryError> {
            Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn insert(&self, order: &dosirak_core::Order) -> Result<(), RepositoryError> {
            self.0.insert(order).await
        }

        async fn save(&self, lease: &OrderLease, order: &dosirak_core::Order) -> Result<(), RepositoryError> {
            self.0.save(lease, order).await
        }

        async fn ping(&self) -> Result<(), RepositoryError> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn test_writers_only_use_their_lease() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        let service = OrderService::new(
            Arc::new(DrainedPool(store.clone())),
            Arc::clone(&gateway) as Arc<dyn crate::gateway::PaymentGateway>,
            clock_at(2026, 10, 1),
            crate::feed::ChangeFeed::new(8),
            kst(),
        );
        let id = OrderId::new("order-1");

        let result = service
            .cancel(&id, &buyer(), &cancel_all("changed my mind"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result.refund_amount, Money::won(50_000));

        let changed = service
            .apply_gateway_event(&GatewayNotification {
                order_id: id,
                payment_id: PaymentId::new("tx-sample-order-1"),
                status: PaymentEvent::Cancelled,
            })
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!changed);
        assert_eq!(store.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_refund_quote_matches_tier() {
        let store = MemoryOrderStore::with_orders([sample_order("order-1")]);
        let gateway = Arc::new(ScriptedGateway::new());
        // One day out: 50%.
        let service = service_with(&store, &gateway, clock_at(2026, 10, 4));

        let quote = service
            .refund_quote(&OrderId::new("order-1"), &buyer(), &CancelScope::All)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(quote.rate, RefundRate::HALF);
        assert_eq!(quote.days_until_delivery, 1);
        assert_eq!(quote.total_refund, Money::won(25_000));
        assert!(quote.cancellable);
        assert_eq!(gateway.call_count().await, 0);
    }
}
