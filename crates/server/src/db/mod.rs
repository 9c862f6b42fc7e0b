//! Order persistence.
//!
//! # Database: `dosirak`
//!
//! ## Tables
//!
//! - `orders` - Order aggregate roots (status pair, delivery details, flags)
//! - `payment_groups` - One row per gateway charge, in creation order
//! - `order_items` - Purchased lines, each pointing at the group that paid for it
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p dosirak-cli -- migrate
//! ```
//!
//! # Write serialization
//!
//! Every write path first takes an [`OrderLease`] for the order, then re-reads
//! it through the lease. The Postgres store pins one pooled connection per
//! lease and holds a session advisory lock on it; reads and writes under the
//! lease run on that connection. The in-memory store uses a per-order async
//! mutex.

pub mod memory;
pub mod orders;

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use dosirak_core::{Order, OrderId, StoreId, UserId};

pub use memory::MemoryOrderStore;
pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order id).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Exclusive right to write one order.
///
/// Dropping the lease releases it. Whatever the store keeps inside (a lock
/// guard, a pinned connection) is reachable again through [`OrderLease::holder`].
#[must_use = "the lease is released as soon as it is dropped"]
pub struct OrderLease {
    order_id: OrderId,
    held: Box<dyn Any + Send + Sync>,
}

impl OrderLease {
    /// Wrap whatever keeps the order locked.
    pub fn new(order_id: OrderId, held: impl Any + Send + Sync) -> Self {
        Self {
            order_id,
            held: Box::new(held),
        }
    }

    /// The order this lease covers.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// The store-specific holder, if it is a `T`.
    #[must_use]
    pub fn holder<T: Any>(&self) -> Option<&T> {
        self.held.downcast_ref()
    }
}

impl std::fmt::Debug for OrderLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderLease")
            .field("order_id", &self.order_id)
            .finish_non_exhaustive()
    }
}

/// Which orders to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub uid: Option<UserId>,
    pub store_id: Option<StoreId>,
}

impl OrderQuery {
    /// Orders placed by one buyer.
    #[must_use]
    pub fn buyer(uid: UserId) -> Self {
        Self {
            uid: Some(uid),
            store_id: None,
        }
    }

    /// Orders placed with one store.
    #[must_use]
    pub fn store(store_id: StoreId) -> Self {
        Self {
            uid: None,
            store_id: Some(store_id),
        }
    }

    pub(crate) fn matches(&self, order: &Order) -> bool {
        self.uid.as_ref().is_none_or(|uid| &order.uid == uid)
            && self.store_id.as_ref().is_none_or(|s| &order.store_id == s)
    }
}

/// Persisted order collection.
///
/// `save` writes the fields the engine owns: both statuses, the delivery
/// details (tracking), the additional-order flag, every payment group's
/// status, and any groups or items not yet stored. Amounts and existing
/// items are never rewritten.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Take the write lease for an order. Waits while another writer holds it.
    async fn lease(&self, id: &OrderId) -> Result<OrderLease, RepositoryError>;

    /// Load one order.
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Load the leased order through the lease itself, so a writer never
    /// needs a second connection while it holds one.
    async fn get_leased(&self, lease: &OrderLease) -> Result<Option<Order>, RepositoryError>;

    /// Load every order matching the query.
    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>, RepositoryError>;

    /// Store a new order. Fails with [`RepositoryError::Conflict`] if the id exists.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Persist engine-owned changes to an existing order.
    async fn save(&self, lease: &OrderLease, order: &Order) -> Result<(), RepositoryError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
