//! Scenario harness for Dosirak order tests.
//!
//! A [`Marketplace`] owns one in-memory store and one scripted gateway.
//! [`Marketplace::on`] hands out an [`OrderService`] whose clock is pinned to
//! a given day, so a test can walk an order across several dates while every
//! service sees the same orders and gateway history.

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use dosirak_core::{Actor, Money, Order, OrderId, StoreId, UserId};
use dosirak_server::services::OrderService;
use dosirak_server::testing::{MemoryOrderStore, ScriptedGateway, clock_at, sample_order, service_with};

pub use dosirak_server::testing;

pub const ORDER: &str = "order-1";
pub const FIRST_PAYMENT: &str = "tx-sample-order-1";

/// Shared store and gateway for a scenario.
#[derive(Clone)]
pub struct Marketplace {
    pub store: MemoryOrderStore,
    pub gateway: Arc<ScriptedGateway>,
}

impl Marketplace {
    /// A marketplace holding the sample order (50,000 incl. 3,000 fee,
    /// delivered 2026-10-05).
    #[must_use]
    pub fn with_sample_order() -> Self {
        Self {
            store: MemoryOrderStore::with_orders([sample_order(ORDER)]),
            gateway: Arc::new(ScriptedGateway::new()),
        }
    }

    /// Service whose clock reads 12:00 KST on the given day.
    #[must_use]
    pub fn on(&self, y: i32, m: u32, d: u32) -> OrderService {
        service_with(&self.store, &self.gateway, clock_at(y, m, d))
    }

    /// The stored order.
    pub async fn order(&self) -> Order {
        use dosirak_server::db::OrderStore;
        self.store
            .get(&OrderId::new(ORDER))
            .await
            .unwrap_or_else(|e| panic!("store: {e}"))
            .unwrap_or_else(|| panic!("{ORDER} missing"))
    }

    /// Sum of every refund the gateway was asked for.
    pub async fn refunded(&self) -> Money {
        self.gateway.calls().await.iter().map(|c| c.refund_amount).sum()
    }
}

#[must_use]
pub fn order_id() -> OrderId {
    OrderId::new(ORDER)
}

#[must_use]
pub fn buyer() -> Actor {
    Actor::buyer(&UserId::new("buyer-1"))
}

#[must_use]
pub fn seller() -> Actor {
    Actor::seller(&StoreId::new("store-1"))
}
