//! Test doubles and fixtures shared by unit and integration tests.
//!
//! Sample orders are 47,000 won of food plus a 3,000 won delivery fee,
//! placed on 2026-10-01 and delivered on 2026-10-05 by `store-1` to
//! `buyer-1`. The initial payment of order `X` is `tx-sample-X`.

#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use dosirak_core::{
    AdditionalOrder, CartLine, ChargeOutcome, Checkout, DeliveryDetails, Money, Order, OrderId,
    PaymentId, PaymentReceipt, ProductId, StoreId, UserId,
};

use crate::clock::{Clock, FixedClock};
use crate::feed::ChangeFeed;
use crate::gateway::{CancelPaymentRequest, CancelPaymentResponse, GatewayError, PaymentGateway};
use crate::services::OrderService;

pub use crate::db::MemoryOrderStore;

/// Gateway double that records every call and refuses on request.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    calls: RwLock<Vec<CancelPaymentRequest>>,
    refusals: RwLock<HashMap<PaymentId, String>>,
    delay: RwLock<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse cancellations of `payment_id` with `message`.
    pub async fn refuse(&self, payment_id: &PaymentId, message: &str) {
        self.refusals
            .write()
            .await
            .insert(payment_id.clone(), message.to_string());
    }

    /// Stop refusing `payment_id`.
    pub async fn allow(&self, payment_id: &PaymentId) {
        self.refusals.write().await.remove(payment_id);
    }

    /// Hold every call for `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Every request seen so far, refused ones included.
    pub async fn calls(&self) -> Vec<CancelPaymentRequest> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn cancel(&self, request: &CancelPaymentRequest) -> Result<CancelPaymentResponse, GatewayError> {
        self.calls.write().await.push(request.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(match self.refusals.read().await.get(&request.transaction_id) {
            Some(message) => CancelPaymentResponse::refused(message.clone()),
            None => CancelPaymentResponse::ok(),
        })
    }
}

/// Korea Standard Time.
#[must_use]
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Noon KST on the given date.
#[must_use]
pub fn clock_at(y: i32, m: u32, d: u32) -> Arc<dyn Clock> {
    let instant = Utc
        .with_ymd_and_hms(y, m, d, 3, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid date {y}-{m}-{d}"));
    Arc::new(FixedClock(instant))
}

#[must_use]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_else(|| panic!("invalid date {y}-{m}-{d}"))
}

#[must_use]
pub fn line(product: &str, price: i64) -> CartLine {
    CartLine {
        product_id: ProductId::new(product),
        name: format!("{product} box"),
        quantity: 1,
        unit_price: Money::won(price),
        item_price: Money::won(price),
        options: BTreeMap::new(),
        discount: None,
    }
}

#[must_use]
pub fn receipt(tx: &str) -> PaymentReceipt {
    PaymentReceipt {
        transaction_id: PaymentId::new(tx),
        outcome: ChargeOutcome::Paid,
        points_used: Money::ZERO,
        paid_at: Utc
            .with_ymd_and_hms(2026, 10, 1, 3, 0, 0)
            .single()
            .unwrap_or_default(),
    }
}

/// Checkout for a paid quick-delivery order.
#[must_use]
pub fn sample_checkout(id: &str) -> Checkout {
    Checkout {
        order_id: OrderId::new(id),
        uid: UserId::new("buyer-1"),
        store_id: StoreId::new("store-1"),
        lines: vec![line("bulgogi", 30_000), line("japchae", 17_000)],
        delivery: DeliveryDetails::Quick {
            address: "서울시 중구 세종대로 110".to_string(),
            recipient_phone: None,
        },
        delivery_date: date(2026, 10, 5),
        delivery_time: None,
        delivery_fee: Money::won(3_000),
        payment: receipt(&format!("tx-sample-{id}")),
        created_at: Utc
            .with_ymd_and_hms(2026, 10, 1, 3, 0, 0)
            .single()
            .unwrap_or_default(),
    }
}

/// A pending, paid order built from [`sample_checkout`].
#[must_use]
pub fn sample_order(id: &str) -> Order {
    Order::from_checkout(sample_checkout(id)).unwrap_or_else(|e| panic!("sample order: {e}"))
}

/// One-line additional purchase paid by `tx`.
#[must_use]
pub fn additional_order(tx: &str, price: i64) -> AdditionalOrder {
    AdditionalOrder {
        lines: vec![line("kimbap", price)],
        payment: receipt(tx),
    }
}

/// Service over the given store and gateway, in KST.
#[must_use]
pub fn service_with(
    store: &MemoryOrderStore,
    gateway: &Arc<ScriptedGateway>,
    clock: Arc<dyn Clock>,
) -> OrderService {
    OrderService::new(
        Arc::new(store.clone()),
        Arc::clone(gateway) as Arc<dyn PaymentGateway>,
        clock,
        ChangeFeed::new(64),
        kst(),
    )
}

/// `sha256=<hex>` signature of a webhook body.
#[must_use]
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|e| panic!("hmac key: {e}"));
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
