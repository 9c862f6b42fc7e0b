//! HTTP route handlers for the order API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                   - Liveness
//! GET  /health/ready                             - Readiness (store ping)
//!
//! # Orders (actor headers required)
//! POST /api/orders                               - Checkout intake
//! GET  /api/orders/{id}                          - One order
//! POST /api/orders/{id}/status                   - Advance, reject, or cancel
//! POST /api/orders/{id}/cancel                   - Cancel ALL or ONE payment group
//! POST /api/orders/{id}/additional-orders        - Attach an additional purchase
//! PUT  /api/orders/{id}/allow-additional-order   - Open/close additional purchases
//! GET  /api/orders/{id}/refund-quote             - Refund preview
//! GET  /api/orders/feed                          - Change feed (SSE)
//!
//! # Views (actor headers required)
//! GET  /api/views/buyer                          - Buyer order history
//! GET  /api/views/seller                         - Store dashboard
//! GET  /api/views/admin                          - Platform dashboard
//!
//! # Gateway
//! POST /api/gateway/events                       - Payment notifications (HMAC signed)
//! ```

pub mod feed;
pub mod health;
pub mod orders;
pub mod views;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

/// Create all routes for the order API.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(feed::router())
        .merge(orders::router())
        .merge(views::router())
        .merge(webhook::router())
}
