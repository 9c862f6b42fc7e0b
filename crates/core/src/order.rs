//! The order aggregate: orders, their items, and their payment groups.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::ledger::Ledger;
use crate::types::{
    DeliveryMethod, Money, OrderId, OrderStatus, PaymentGroupStatus, PaymentId, PaymentStatus,
    ProductId, StoreId, UserId,
};

/// Percentage discount attached to a line, with an optional validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    /// Discount in whole percent (0–100).
    pub percent: u8,
    /// First day the discount applies.
    pub starts_on: Option<NaiveDate>,
    /// Last day the discount applies.
    pub ends_on: Option<NaiveDate>,
}

/// A purchased line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    /// Display name at the time of purchase.
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Resolved line total as charged (options and discount already applied).
    pub item_price: Money,
    /// Option selections, e.g. `"rice" → "multigrain"`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub discount: Option<Discount>,
    /// `true` for items bought as an additional order.
    pub is_add_item: bool,
    /// Payment group that paid for this line.
    pub payment_id: PaymentId,
}

/// One discrete charge against the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentGroup {
    /// Gateway transaction id.
    pub id: PaymentId,
    /// Amount charged, delivery fee included when `carries_delivery_fee`.
    pub amount: Money,
    /// Set once at creation; only the initial group of an order carries the fee.
    pub carries_delivery_fee: bool,
    /// Fee portion of `amount` (zero unless `carries_delivery_fee`).
    pub delivery_fee: Money,
    pub status: PaymentGroupStatus,
    /// Point currency applied on top of the cash amount.
    pub points_used: Money,
    pub paid_at: DateTime<Utc>,
    /// `true` for groups created by an additional order.
    pub is_additional: bool,
}

impl PaymentGroup {
    /// Whether the group still holds a live charge.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PaymentGroupStatus::Paid
    }

    /// Product portion of the charge.
    #[must_use]
    pub fn item_total(&self) -> Money {
        self.amount - self.delivery_fee
    }
}

/// Carrier and tracking number for a parcel shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub carrier: String,
    pub tracking_number: String,
}

impl TrackingInfo {
    /// Whether both fields carry something.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.carrier.trim().is_empty() && !self.tracking_number.trim().is_empty()
    }
}

/// Delivery-method-specific details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DeliveryDetails {
    /// Same-day courier.
    Quick {
        address: String,
        #[serde(default)]
        recipient_phone: Option<String>,
    },
    /// Parcel carrier; tracking is filled in when the seller ships.
    Parcel {
        address: String,
        #[serde(default)]
        tracking: Option<TrackingInfo>,
    },
    /// Store pickup.
    Pickup {
        #[serde(default)]
        pickup_contact: Option<String>,
    },
}

impl DeliveryDetails {
    /// The delivery method this variant represents.
    #[must_use]
    pub const fn method(&self) -> DeliveryMethod {
        match self {
            Self::Quick { .. } => DeliveryMethod::Quick,
            Self::Parcel { .. } => DeliveryMethod::Parcel,
            Self::Pickup { .. } => DeliveryMethod::Pickup,
        }
    }

    /// Tracking info, for parcel orders that have shipped.
    #[must_use]
    pub const fn tracking(&self) -> Option<&TrackingInfo> {
        match self {
            Self::Parcel { tracking, .. } => tracking.as_ref(),
            _ => None,
        }
    }
}

/// The order aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Buyer uid.
    pub uid: UserId,
    pub store_id: StoreId,
    pub items: Vec<OrderItem>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery: DeliveryDetails,
    pub delivery_date: NaiveDate,
    pub delivery_time: Option<NaiveTime>,
    pub delivery_fee: Money,
    pub created_at: DateTime<Utc>,
    /// Payment groups in creation order.
    pub payment_info: Vec<PaymentGroup>,
    pub allow_additional_order: bool,
}

impl Order {
    /// Build a new `pending` order from a completed checkout.
    ///
    /// The initial payment group carries the delivery fee.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::PreconditionNotMet`] if the checkout has no lines,
    /// or any amount is negative, fractional, or above [`Money::MAX_CHARGE`].
    pub fn from_checkout(checkout: Checkout) -> Result<Self, OrderError> {
        if checkout.lines.is_empty() {
            return Err(OrderError::precondition("an order needs at least one item"));
        }
        check_amount("delivery fee", checkout.delivery_fee)?;
        check_amount("points used", checkout.payment.points_used)?;

        let payment_id = checkout.payment.transaction_id.clone();
        let items = into_items(checkout.lines, &payment_id, false)?;
        let amount = charge_total(&items, checkout.delivery_fee)?;

        let (group_status, payment_status) = checkout.payment.outcome.statuses();
        let group = PaymentGroup {
            id: payment_id,
            amount,
            carries_delivery_fee: true,
            delivery_fee: checkout.delivery_fee,
            status: group_status,
            points_used: checkout.payment.points_used,
            paid_at: checkout.payment.paid_at,
            is_additional: false,
        };

        Ok(Self {
            id: checkout.order_id,
            uid: checkout.uid,
            store_id: checkout.store_id,
            items,
            order_status: OrderStatus::Pending,
            payment_status,
            delivery: checkout.delivery,
            delivery_date: checkout.delivery_date,
            delivery_time: checkout.delivery_time,
            delivery_fee: checkout.delivery_fee,
            created_at: checkout.created_at,
            payment_info: vec![group],
            allow_additional_order: false,
        })
    }

    /// The delivery method of the order.
    #[must_use]
    pub const fn delivery_method(&self) -> DeliveryMethod {
        self.delivery.method()
    }

    /// Look up a payment group by id.
    #[must_use]
    pub fn group(&self, payment_id: &PaymentId) -> Option<&PaymentGroup> {
        self.payment_info.iter().find(|group| &group.id == payment_id)
    }

    pub(crate) fn group_mut(&mut self, payment_id: &PaymentId) -> Option<&mut PaymentGroup> {
        self.payment_info
            .iter_mut()
            .find(|group| &group.id == payment_id)
    }

    /// Items paid for by the given group.
    pub fn items_for<'a>(&'a self, payment_id: &'a PaymentId) -> impl Iterator<Item = &'a OrderItem> {
        self.items
            .iter()
            .filter(move |item| &item.payment_id == payment_id)
    }

    /// Ledger view over this order's payment groups.
    #[must_use]
    pub const fn ledger(&self) -> Ledger<'_> {
        Ledger::new(self)
    }

    /// The amount currently charged across all active groups.
    #[must_use]
    pub fn effective_total(&self) -> Money {
        self.ledger().active_total()
    }

    /// Completed orders can be reviewed by the buyer.
    #[must_use]
    pub fn is_review_eligible(&self) -> bool {
        self.order_status == OrderStatus::Completed
    }
}

/// A cart line as resolved by the catalog at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Line total as charged.
    pub item_price: Money,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub discount: Option<Discount>,
}

/// Reject amounts a charge cannot carry.
fn check_amount(label: &str, amount: Money) -> Result<(), OrderError> {
    if amount.is_negative() {
        return Err(OrderError::precondition(format!("{label} cannot be negative")));
    }
    if !amount.is_whole() {
        return Err(OrderError::precondition(format!("{label} must be whole won")));
    }
    if amount > Money::MAX_CHARGE {
        return Err(OrderError::precondition(format!(
            "{label} exceeds {}",
            Money::MAX_CHARGE
        )));
    }
    Ok(())
}

fn into_items(
    lines: Vec<CartLine>,
    payment_id: &PaymentId,
    is_add_item: bool,
) -> Result<Vec<OrderItem>, OrderError> {
    lines
        .into_iter()
        .map(|line| {
            check_amount("unit price", line.unit_price)?;
            check_amount("item price", line.item_price)?;
            Ok(line.into_item(payment_id.clone(), is_add_item))
        })
        .collect()
}

/// Item prices plus `fee`, capped at [`Money::MAX_CHARGE`].
fn charge_total(items: &[OrderItem], fee: Money) -> Result<Money, OrderError> {
    let total = Money::checked_sum(items.iter().map(|item| item.item_price).chain([fee]))
        .ok_or_else(|| OrderError::precondition("order total overflows"))?;
    check_amount("order total", total)?;
    Ok(total)
}

impl CartLine {
    fn into_item(self, payment_id: PaymentId, is_add_item: bool) -> OrderItem {
        OrderItem {
            product_id: self.product_id,
            name: self.name,
            quantity: self.quantity,
            unit_price: self.unit_price,
            item_price: self.item_price,
            options: self.options,
            discount: self.discount,
            is_add_item,
            payment_id,
        }
    }
}

/// Result of a charge attempt as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    Paid,
    Failed,
}

impl ChargeOutcome {
    const fn statuses(self) -> (PaymentGroupStatus, PaymentStatus) {
        match self {
            Self::Paid => (PaymentGroupStatus::Paid, PaymentStatus::Paid),
            Self::Failed => (PaymentGroupStatus::Failed, PaymentStatus::Failed),
        }
    }
}

/// Gateway receipt for one checkout action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub transaction_id: PaymentId,
    pub outcome: ChargeOutcome,
    #[serde(default)]
    pub points_used: Money,
    pub paid_at: DateTime<Utc>,
}

/// Everything needed to open a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub order_id: OrderId,
    pub uid: UserId,
    pub store_id: StoreId,
    pub lines: Vec<CartLine>,
    pub delivery: DeliveryDetails,
    pub delivery_date: NaiveDate,
    pub delivery_time: Option<NaiveTime>,
    pub delivery_fee: Money,
    pub payment: PaymentReceipt,
    pub created_at: DateTime<Utc>,
}

/// A further purchase attached to an order that is being prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalOrder {
    pub lines: Vec<CartLine>,
    pub payment: PaymentReceipt,
}

impl AdditionalOrder {
    /// Split into the new payment group and its items.
    ///
    /// Amounts are checked the same way as at checkout.
    pub(crate) fn into_group(self) -> Result<(PaymentGroup, Vec<OrderItem>), OrderError> {
        check_amount("points used", self.payment.points_used)?;
        let payment_id = self.payment.transaction_id.clone();
        let items = into_items(self.lines, &payment_id, true)?;
        let amount = charge_total(&items, Money::ZERO)?;
        let (status, _) = self.payment.outcome.statuses();
        let group = PaymentGroup {
            id: payment_id,
            amount,
            carries_delivery_fee: false,
            delivery_fee: Money::ZERO,
            status,
            points_used: self.payment.points_used,
            paid_at: self.payment.paid_at,
            is_additional: true,
        };
        Ok((group, items))
    }
}
