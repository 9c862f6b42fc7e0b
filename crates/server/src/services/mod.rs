//! Order services.
//!
//! [`OrderService`] is the write path for orders: every mutation takes the
//! order's lease, re-reads the order, applies a `dosirak_core` transition,
//! persists it and publishes an [`OrderChange`](crate::feed::OrderChange).
//!
//! - [`orders`] - checkout intake, status changes, additional orders,
//!   gateway notifications, and the role-scoped views
//! - [`cancellation`] - split-payment cancellation and refund quotes

pub mod cancellation;
pub mod orders;

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use thiserror::Error;

use dosirak_core::refund::local_date;
use dosirak_core::{Order, OrderError, OrderId};

use crate::clock::Clock;
use crate::db::{OrderLease, OrderStore, RepositoryError};
use crate::feed::{ChangeFeed, ChangeKind, OrderChange};
use crate::gateway::PaymentGateway;

pub use cancellation::{CancelOrder, CancellationResult, RefundQuote};
pub use orders::{AdminOverview, GatewayNotification};

/// Errors from the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Order write path and read models.
#[derive(Clone)]
pub struct OrderService {
    inner: Arc<OrderServiceInner>,
}

struct OrderServiceInner {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    feed: ChangeFeed,
    business_offset: FixedOffset,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("business_offset", &self.inner.business_offset)
            .field("subscribers", &self.inner.feed.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl OrderService {
    /// Wire up a service.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        feed: ChangeFeed,
        business_offset: FixedOffset,
    ) -> Self {
        Self {
            inner: Arc::new(OrderServiceInner {
                store,
                gateway,
                clock,
                feed,
                business_offset,
            }),
        }
    }

    /// The change feed this service publishes to.
    #[must_use]
    pub fn feed(&self) -> &ChangeFeed {
        &self.inner.feed
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &dyn OrderStore {
        self.inner.store.as_ref()
    }

    /// Today's date in the business timezone.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        local_date(self.inner.clock.now(), self.inner.business_offset)
    }

    fn gateway(&self) -> &dyn PaymentGateway {
        self.inner.gateway.as_ref()
    }

    async fn load(&self, id: &OrderId) -> Result<Order, ServiceError> {
        self.store()
            .get(id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(id.clone()).into())
    }

    /// Re-read the leased order over the lease's own connection.
    async fn load_leased(&self, lease: &OrderLease) -> Result<Order, ServiceError> {
        self.store()
            .get_leased(lease)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(lease.order_id().clone()).into())
    }

    fn publish(&self, order: &Order, kind: ChangeKind) {
        let receivers = self.inner.feed.publish(OrderChange {
            order_id: order.id.clone(),
            uid: order.uid.clone(),
            store_id: order.store_id.clone(),
            order_status: order.order_status,
            payment_status: order.payment_status,
            kind,
            at: self.inner.clock.now(),
        });
        tracing::debug!(order_id = %order.id, receivers, "change published");
    }
}
