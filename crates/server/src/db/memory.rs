//! In-memory order store.
//!
//! Used by tests and local runs without Postgres. Leases are per-order
//! `tokio` mutexes, so concurrent writers queue exactly as they would behind
//! the advisory lock. A mutex lives only while someone holds or waits for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use dosirak_core::{Order, OrderId};

use super::{OrderLease, OrderQuery, OrderStore, RepositoryError};

/// Order store backed by a map.
#[derive(Debug, Default, Clone)]
pub struct MemoryOrderStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    orders: RwLock<BTreeMap<OrderId, Order>>,
    // Never held across an await.
    locks: std::sync::Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl MemoryInner {
    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<OrderId, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by a memory lease; drops the order's mutex from the map once nobody
/// else is holding or waiting for it.
struct MemoryLease {
    order_id: OrderId,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    store: Arc<MemoryInner>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.store.locks();
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.order_id);
        }
    }
}

impl MemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders with a live lease or waiting writer.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.inner.locks().len()
    }

    /// Create a store pre-loaded with orders.
    #[must_use]
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let map = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        Self {
            inner: Arc::new(MemoryInner {
                orders: RwLock::new(map),
                locks: std::sync::Mutex::default(),
            }),
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn lease(&self, id: &OrderId) -> Result<OrderLease, RepositoryError> {
        let lock = Arc::clone(self.inner.locks().entry(id.clone()).or_default());
        let mut held = MemoryLease {
            order_id: id.clone(),
            guard: None,
            lock,
            store: Arc::clone(&self.inner),
        };
        held.guard = Some(Arc::clone(&held.lock).lock_owned().await);
        Ok(OrderLease::new(id.clone(), held))
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.inner.orders.read().await.get(id).cloned())
    }

    async fn get_leased(&self, lease: &OrderLease) -> Result<Option<Order>, RepositoryError> {
        self.get(lease.order_id()).await
    }

    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.inner.orders.read().await;
        Ok(orders.values().filter(|o| query.matches(o)).cloned().collect())
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.inner.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn save(&self, lease: &OrderLease, order: &Order) -> Result<(), RepositoryError> {
        if lease.order_id() != &order.id {
            return Err(RepositoryError::Conflict(format!(
                "lease for {} cannot write order {}",
                lease.order_id(),
                order.id
            )));
        }
        let mut orders = self.inner.orders.write().await;
        let stored = orders.get_mut(&order.id).ok_or(RepositoryError::NotFound)?;
        *stored = order.clone();
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
