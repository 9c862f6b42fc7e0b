//! HTTP middleware for the order API.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//!
//! Actor context is not a layer: handlers take a [`RequireActor`] extractor.

pub mod auth;
pub mod request_id;
pub mod signature;

pub use auth::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, RequireActor};
pub use request_id::{RequestId, request_id_middleware};
pub use signature::{SIGNATURE_HEADER, verify_signature};
