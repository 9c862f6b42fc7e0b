//! In-process order change feed.
//!
//! Every successful write publishes an [`OrderChange`]. Readers subscribe
//! and re-run their projection; a reader that falls behind skips ahead and
//! should reload its view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use dosirak_core::{Money, OrderId, OrderStatus, PaymentId, PaymentStatus, RefundRate, StoreId, UserId};

/// What happened to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Placed,
    StatusChanged {
        from: OrderStatus,
        to: OrderStatus,
    },
    /// Refunds went through. Carries what the buyer gets back.
    Cancelled {
        rate: RefundRate,
        #[serde(rename = "refundAmount")]
        refund_amount: Money,
        #[serde(rename = "cancelledGroups")]
        cancelled_groups: Vec<PaymentId>,
    },
    AdditionalOrder {
        #[serde(rename = "paymentId")]
        payment_id: PaymentId,
    },
    AllowAdditionalOrder {
        allow: bool,
    },
    PaymentUpdated {
        #[serde(rename = "paymentId")]
        payment_id: PaymentId,
    },
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderChange {
    pub order_id: OrderId,
    pub uid: UserId,
    pub store_id: StoreId,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

/// Broadcast hub for [`OrderChange`]s.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Arc<OrderChange>>,
}

impl ChangeFeed {
    /// Create a feed buffering up to `capacity` changes per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change. Returns how many subscribers will see it.
    pub fn publish(&self, change: OrderChange) -> usize {
        // No subscribers is not an error.
        self.sender.send(Arc::new(change)).unwrap_or(0)
    }

    /// Start receiving changes published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OrderChange>> {
        self.sender.subscribe()
    }

    /// Current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
