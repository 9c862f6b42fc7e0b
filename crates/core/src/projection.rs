//! Role-scoped, read-only views over a set of orders.
//!
//! Projections take a snapshot slice and return new vectors of references.
//! They hold no state, so re-running one on every change notification is fine.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::order::Order;
use crate::types::{DeliveryMethod, Money, OrderStatus, PaymentStatus, StoreId, UserId};

/// Tabs on the buyer's order history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerBucket {
    /// Payment not completed (unpaid or failed).
    Unpaid,
    Pending,
    Preparing,
    Shipping,
    Completed,
    /// Cancelled, rejected, or refunded.
    Cancelled,
}

impl BuyerBucket {
    /// The bucket an order falls into.
    #[must_use]
    pub const fn of(order: &Order) -> Self {
        if order.order_status.is_cancellation()
            || matches!(order.payment_status, PaymentStatus::Refunded)
        {
            return Self::Cancelled;
        }
        if matches!(order.payment_status, PaymentStatus::Unpaid | PaymentStatus::Failed) {
            return Self::Unpaid;
        }
        match order.order_status {
            OrderStatus::Pending => Self::Pending,
            OrderStatus::Preparing => Self::Preparing,
            OrderStatus::Shipping => Self::Shipping,
            OrderStatus::Completed => Self::Completed,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::CancelledBeforeAccept => {
                Self::Cancelled
            }
        }
    }
}

/// The buyer's own orders, newest first.
#[must_use]
pub fn buyer_view<'a>(orders: &'a [Order], uid: &UserId, bucket: Option<BuyerBucket>) -> Vec<&'a Order> {
    let mut view: Vec<&Order> = orders
        .iter()
        .filter(|o| &o.uid == uid)
        .filter(|o| bucket.is_none_or(|b| BuyerBucket::of(o) == b))
        .collect();
    view.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    view
}

/// Tabs on the seller dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SellerBucket {
    #[default]
    All,
    Pending,
    Preparing,
    Shipping,
    Completed,
    /// Rejected or cancelled by either side.
    Cancelled,
}

impl SellerBucket {
    /// Buckets that partition the order set (everything except `All`).
    pub const STATUS_BUCKETS: [Self; 5] = [
        Self::Pending,
        Self::Preparing,
        Self::Shipping,
        Self::Completed,
        Self::Cancelled,
    ];

    /// The status bucket an order falls into (never `All`).
    #[must_use]
    pub const fn of(order: &Order) -> Self {
        match order.order_status {
            OrderStatus::Pending => Self::Pending,
            OrderStatus::Preparing => Self::Preparing,
            OrderStatus::Shipping => Self::Shipping,
            OrderStatus::Completed => Self::Completed,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::CancelledBeforeAccept => {
                Self::Cancelled
            }
        }
    }

    /// Whether an order is shown under this bucket.
    #[must_use]
    pub fn contains(self, order: &Order) -> bool {
        self == Self::All || Self::of(order) == self
    }
}

/// Filters shared by the seller and admin dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerFilter {
    #[serde(default)]
    pub bucket: SellerBucket,
    pub delivery_method: Option<DeliveryMethod>,
    /// Inclusive lower bound on the delivery date.
    pub delivery_from: Option<NaiveDate>,
    /// Inclusive upper bound on the delivery date.
    pub delivery_to: Option<NaiveDate>,
}

impl SellerFilter {
    fn matches(&self, order: &Order) -> bool {
        self.bucket.contains(order)
            && self.delivery_method.is_none_or(|m| order.delivery_method() == m)
            && self.delivery_from.is_none_or(|from| order.delivery_date >= from)
            && self.delivery_to.is_none_or(|to| order.delivery_date <= to)
    }
}

/// Orders that have not been paid never reach a store's queue.
const fn visible_to_store(order: &Order) -> bool {
    !matches!(order.payment_status, PaymentStatus::Unpaid | PaymentStatus::Failed)
}

/// Oldest first; in the `All` bucket, pending orders go to the front.
fn sort_for_store(view: &mut [&Order], bucket: SellerBucket) {
    view.sort_by(|a, b| {
        let pending_first = if bucket == SellerBucket::All {
            (b.order_status == OrderStatus::Pending).cmp(&(a.order_status == OrderStatus::Pending))
        } else {
            std::cmp::Ordering::Equal
        };
        pending_first
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// One store's paid orders.
#[must_use]
pub fn seller_view<'a>(orders: &'a [Order], store_id: &StoreId, filter: &SellerFilter) -> Vec<&'a Order> {
    let mut view: Vec<&Order> = orders
        .iter()
        .filter(|o| &o.store_id == store_id && visible_to_store(o) && filter.matches(o))
        .collect();
    sort_for_store(&mut view, filter.bucket);
    view
}

/// Per-store aggregate on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub orders: usize,
    pub active_total: Money,
}

/// Aggregates across every store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSummary {
    pub by_bucket: BTreeMap<SellerBucket, usize>,
    pub by_store: BTreeMap<StoreId, StoreSummary>,
    /// Sum of every active payment group.
    pub active_total: Money,
}

/// Admin dashboard: filtered orders plus platform-wide aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminView<'a> {
    pub orders: Vec<&'a Order>,
    pub summary: AdminSummary,
}

/// Every store's paid orders, optionally narrowed to one store.
///
/// The summary covers the store selection but ignores the bucket, date and
/// method filters, so the tab counts stay stable while switching tabs.
#[must_use]
pub fn admin_view<'a>(orders: &'a [Order], store_id: Option<&StoreId>, filter: &SellerFilter) -> AdminView<'a> {
    let selected = orders
        .iter()
        .filter(|o| visible_to_store(o) && store_id.is_none_or(|s| &o.store_id == s));

    let mut summary = AdminSummary::default();
    for bucket in SellerBucket::STATUS_BUCKETS {
        summary.by_bucket.insert(bucket, 0);
    }
    let mut view = Vec::new();
    for order in selected {
        let active = order.effective_total();
        *summary.by_bucket.entry(SellerBucket::of(order)).or_default() += 1;
        let store = summary.by_store.entry(order.store_id.clone()).or_default();
        store.orders += 1;
        store.active_total += active;
        summary.active_total += active;

        if filter.matches(order) {
            view.push(order);
        }
    }
    sort_for_store(&mut view, filter.bucket);

    AdminView { orders: view, summary }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::order::fixtures::{checkout, date, parcel, quick};
    use crate::types::{OrderId, PaymentGroupStatus};

    fn make(id: &str, uid: &str, store: &str, hours: i64, status: OrderStatus) -> Order {
        let mut c = checkout(quick());
        c.order_id = OrderId::new(id);
        c.uid = UserId::new(uid);
        c.store_id = StoreId::new(store);
        c.created_at += Duration::hours(hours);
        c.payment.transaction_id = format!("tx-{id}").into();
        let mut order = Order::from_checkout(c).unwrap_or_else(|e| panic!("{e}"));
        order.order_status = status;
        order
    }

    fn ids(view: &[&Order]) -> Vec<String> {
        view.iter().map(|o| o.id.to_string()).collect()
    }

    #[test]
    fn test_buyer_view_is_newest_first_and_bucketed() {
        let mut unpaid = make("o4", "buyer-1", "store-1", 4, OrderStatus::Pending);
        unpaid.payment_status = PaymentStatus::Failed;
        let orders = vec![
            make("o1", "buyer-1", "store-1", 1, OrderStatus::Completed),
            make("o2", "buyer-1", "store-2", 2, OrderStatus::Rejected),
            make("o3", "buyer-2", "store-1", 3, OrderStatus::Pending),
            unpaid,
        ];
        let me = UserId::new("buyer-1");

        assert_eq!(ids(&buyer_view(&orders, &me, None)), ["o4", "o2", "o1"]);
        assert_eq!(ids(&buyer_view(&orders, &me, Some(BuyerBucket::Unpaid))), ["o4"]);
        assert_eq!(ids(&buyer_view(&orders, &me, Some(BuyerBucket::Cancelled))), ["o2"]);
    }

    #[test]
    fn test_seller_all_bucket_puts_pending_first() {
        let orders = vec![
            make("o1", "b", "store-1", 1, OrderStatus::Preparing),
            make("o2", "b", "store-1", 2, OrderStatus::Pending),
            make("o3", "b", "store-1", 3, OrderStatus::Shipping),
            make("o4", "b", "store-1", 4, OrderStatus::Pending),
            make("o5", "b", "store-2", 0, OrderStatus::Pending),
        ];
        let store = StoreId::new("store-1");

        let all = seller_view(&orders, &store, &SellerFilter::default());
        assert_eq!(ids(&all), ["o2", "o4", "o1", "o3"]);

        let filter = SellerFilter {
            bucket: SellerBucket::Pending,
            ..SellerFilter::default()
        };
        assert_eq!(ids(&seller_view(&orders, &store, &filter)), ["o2", "o4"]);
    }

    #[test]
    fn test_seller_filters_by_method_and_delivery_date() {
        let mut parcel_order = make("o2", "b", "store-1", 2, OrderStatus::Pending);
        parcel_order.delivery = parcel();
        parcel_order.delivery_date = date(2026, 10, 9);
        let mut unpaid = make("o3", "b", "store-1", 3, OrderStatus::Pending);
        unpaid.payment_status = PaymentStatus::Unpaid;
        let orders = vec![make("o1", "b", "store-1", 1, OrderStatus::Pending), parcel_order, unpaid];
        let store = StoreId::new("store-1");

        let by_method = SellerFilter {
            delivery_method: Some(DeliveryMethod::Parcel),
            ..SellerFilter::default()
        };
        assert_eq!(ids(&seller_view(&orders, &store, &by_method)), ["o2"]);

        let by_date = SellerFilter {
            delivery_from: Some(date(2026, 10, 1)),
            delivery_to: Some(date(2026, 10, 5)),
            ..SellerFilter::default()
        };
        assert_eq!(ids(&seller_view(&orders, &store, &by_date)), ["o1"]);
    }

    #[test]
    fn test_admin_summary_aggregates_across_stores() {
        let mut refunded = make("o3", "b", "store-2", 3, OrderStatus::Rejected);
        refunded.payment_info[0].status = PaymentGroupStatus::Cancelled;
        refunded.payment_status = PaymentStatus::Refunded;
        let orders = vec![
            make("o1", "b", "store-1", 1, OrderStatus::Pending),
            make("o2", "b", "store-2", 2, OrderStatus::Preparing),
            refunded,
        ];

        let view = admin_view(&orders, None, &SellerFilter::default());
        assert_eq!(view.orders.len(), 3);
        assert_eq!(view.summary.active_total, Money::won(100_000));
        assert_eq!(view.summary.by_bucket[&SellerBucket::Cancelled], 1);
        assert_eq!(view.summary.by_bucket[&SellerBucket::Completed], 0);
        assert_eq!(view.summary.by_store[&StoreId::new("store-2")].orders, 2);

        let store = StoreId::new("store-1");
        let narrowed = admin_view(&orders, Some(&store), &SellerFilter::default());
        assert_eq!(ids(&narrowed.orders), ["o1"]);
        assert_eq!(narrowed.summary.active_total, Money::won(50_000));
    }
}
