//! Order intake, lifecycle writes, gateway notifications, and views.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use dosirak_core::lifecycle::{
    PaymentEvent, StatusChange, advance, append_additional_order, apply_payment_event,
    ensure_party, set_allow_additional_order,
};
use dosirak_core::projection::{
    AdminSummary, BuyerBucket, SellerFilter, admin_view, buyer_view, seller_view,
};
use dosirak_core::{
    Actor, AdditionalOrder, Checkout, Order, OrderError, OrderId, OrderStatus, PaymentId, Role,
    StoreId, TrackingInfo,
};

use crate::db::OrderQuery;
use crate::feed::ChangeKind;

use super::{OrderService, ServiceError};

/// Payment notification pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayNotification {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub status: PaymentEvent,
}

/// Admin dashboard payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOverview {
    pub orders: Vec<Order>,
    pub summary: AdminSummary,
}

impl OrderService {
    /// Open a new order from a completed checkout.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Unauthorized`] unless the actor is the checkout's buyer or an admin.
    /// - [`OrderError::PreconditionNotMet`] for an empty cart.
    /// - `RepositoryError::Conflict` if the order id is taken.
    #[instrument(skip(self, checkout), fields(order_id = %checkout.order_id, actor = %actor))]
    pub async fn place_order(&self, actor: &Actor, checkout: Checkout) -> Result<Order, ServiceError> {
        if !(actor.is_buyer(&checkout.uid) || actor.role == Role::Admin) {
            return Err(OrderError::unauthorized(format!(
                "{actor} cannot place an order for {}",
                checkout.uid
            ))
            .into());
        }

        let order = Order::from_checkout(checkout)?;
        self.store().insert(&order).await?;

        info!(
            store_id = %order.store_id,
            payment_status = %order.payment_status,
            total = %order.effective_total(),
            "order placed"
        );
        self.publish(&order, ChangeKind::Placed);
        Ok(order)
    }

    /// Load one order the actor is a party to.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`] or [`OrderError::Unauthorized`].
    pub async fn get_order(&self, order_id: &OrderId, actor: &Actor) -> Result<Order, ServiceError> {
        let order = self.load(order_id).await?;
        ensure_party(&order, actor)?;
        Ok(order)
    }

    /// Move an order forward (accept, ship, complete, reject).
    ///
    /// Cancellation statuses are refused here; they go through
    /// [`OrderService::cancel_to`] so refunds happen first.
    ///
    /// # Errors
    ///
    /// Any error from [`advance`], or [`OrderError::OrderNotFound`].
    #[instrument(skip(self, actor, tracking), fields(order_id = %order_id, actor = %actor, target = %target))]
    pub async fn advance_status(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        target: OrderStatus,
        tracking: Option<TrackingInfo>,
    ) -> Result<StatusChange, ServiceError> {
        let lease = self.store().lease(order_id).await?;
        let mut order = self.load_leased(&lease).await?;

        let change = advance(&mut order, target, actor, tracking)?;
        self.store().save(&lease, &order).await?;

        info!(from = %change.from, to = %change.to, "order status changed");
        self.publish(
            &order,
            ChangeKind::StatusChanged {
                from: change.from,
                to: change.to,
            },
        );
        Ok(change)
    }

    /// Open or close an order to additional purchases.
    ///
    /// # Errors
    ///
    /// Any error from [`set_allow_additional_order`], or [`OrderError::OrderNotFound`].
    #[instrument(skip(self, actor), fields(order_id = %order_id, actor = %actor))]
    pub async fn set_allow_additional_order(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        allow: bool,
    ) -> Result<bool, ServiceError> {
        let lease = self.store().lease(order_id).await?;
        let mut order = self.load_leased(&lease).await?;

        let changed = set_allow_additional_order(&mut order, actor, allow)?;
        if changed {
            self.store().save(&lease, &order).await?;
            self.publish(&order, ChangeKind::AllowAdditionalOrder { allow });
        }
        Ok(changed)
    }

    /// Attach a further purchase as a new payment group.
    ///
    /// # Errors
    ///
    /// Any error from [`append_additional_order`], or [`OrderError::OrderNotFound`].
    #[instrument(
        skip(self, actor, additional),
        fields(order_id = %order_id, actor = %actor, payment_id = %additional.payment.transaction_id)
    )]
    pub async fn add_additional_order(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        additional: AdditionalOrder,
    ) -> Result<PaymentId, ServiceError> {
        let lease = self.store().lease(order_id).await?;
        let mut order = self.load_leased(&lease).await?;

        let payment_id = append_additional_order(&mut order, actor, additional)?;
        self.store().save(&lease, &order).await?;

        info!(total = %order.effective_total(), "additional order attached");
        self.publish(
            &order,
            ChangeKind::AdditionalOrder {
                payment_id: payment_id.clone(),
            },
        );
        Ok(payment_id)
    }

    /// Record a payment notification from the gateway.
    ///
    /// Repeats are harmless: nothing is written when nothing changes.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`] or [`OrderError::PaymentGroupNotFound`].
    #[instrument(skip(self, notification), fields(order_id = %notification.order_id, payment_id = %notification.payment_id))]
    pub async fn apply_gateway_event(&self, notification: &GatewayNotification) -> Result<bool, ServiceError> {
        let lease = self.store().lease(&notification.order_id).await?;
        let mut order = self.load_leased(&lease).await?;

        let changed = apply_payment_event(&mut order, &notification.payment_id, notification.status)?;
        if changed {
            self.store().save(&lease, &order).await?;
            info!(event = ?notification.status, payment_status = %order.payment_status, "payment updated");
            if order.order_status.is_cancellation() && order.ledger().has_active() {
                warn!(
                    order_status = %order.order_status,
                    charged = %order.effective_total(),
                    "cancelled order holds a charge again; cancel it once more to refund"
                );
            }
            self.publish(
                &order,
                ChangeKind::PaymentUpdated {
                    payment_id: notification.payment_id.clone(),
                },
            );
        }
        Ok(changed)
    }

    /// The actor's own orders, newest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Unauthorized`] for non-buyers.
    pub async fn buyer_orders(&self, actor: &Actor, bucket: Option<BuyerBucket>) -> Result<Vec<Order>, ServiceError> {
        if actor.role != Role::Buyer {
            return Err(OrderError::unauthorized("the buyer view is for buyers").into());
        }
        let uid = dosirak_core::UserId::new(actor.id.clone());
        let orders = self.store().list(&OrderQuery::buyer(uid.clone())).await?;
        Ok(buyer_view(&orders, &uid, bucket).into_iter().cloned().collect())
    }

    /// A store's dashboard.
    ///
    /// # Errors
    ///
    /// [`OrderError::Unauthorized`] unless the actor is that store or an admin.
    pub async fn seller_orders(
        &self,
        actor: &Actor,
        store_id: &StoreId,
        filter: &SellerFilter,
    ) -> Result<Vec<Order>, ServiceError> {
        if !actor.acts_for_store(store_id) {
            return Err(OrderError::unauthorized(format!("{actor} cannot view store {store_id}")).into());
        }
        let orders = self.store().list(&OrderQuery::store(store_id.clone())).await?;
        Ok(seller_view(&orders, store_id, filter).into_iter().cloned().collect())
    }

    /// Platform-wide dashboard.
    ///
    /// # Errors
    ///
    /// [`OrderError::Unauthorized`] for non-admins.
    pub async fn admin_overview(
        &self,
        actor: &Actor,
        store_id: Option<&StoreId>,
        filter: &SellerFilter,
    ) -> Result<AdminOverview, ServiceError> {
        if actor.role != Role::Admin {
            return Err(OrderError::unauthorized("the admin view is for admins").into());
        }
        let orders = self.store().list(&OrderQuery::default()).await?;
        let view = admin_view(&orders, store_id, filter);
        Ok(AdminOverview {
            orders: view.orders.into_iter().cloned().collect(),
            summary: view.summary,
        })
    }
}
