//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::SecretString;

use crate::services::OrderService;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orders: OrderService,
    webhook_secret: Option<SecretString>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Without a `webhook_secret`, gateway notifications are accepted unsigned.
    #[must_use]
    pub fn new(orders: OrderService, webhook_secret: Option<SecretString>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orders,
                webhook_secret,
            }),
        }
    }

    /// The order service.
    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.inner.orders
    }

    /// HMAC key for gateway notifications.
    #[must_use]
    pub fn webhook_secret(&self) -> Option<&SecretString> {
        self.inner.webhook_secret.as_ref()
    }
}
