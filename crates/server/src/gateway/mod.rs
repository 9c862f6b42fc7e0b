//! Payment gateway cancellation.
//!
//! The orchestrator talks to the gateway through [`PaymentGateway`] so tests
//! can swap in a scripted double. The production client is
//! [`HttpPaymentGateway`].

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dosirak_core::{CancelReason, Money, PaymentId};

pub use client::HttpPaymentGateway;

/// Errors that can occur when talking to the gateway.
///
/// A refusal is not an error here; it comes back as a
/// [`CancelPaymentResponse`] with `success = false`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Client could not be built from configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Refund amount is not a whole number of won that fits the wire format.
    #[error("refund amount {0} cannot be sent to the gateway")]
    InvalidAmount(String),
}

/// What a single gateway call covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFlags {
    /// Part of a whole-order cancellation.
    pub whole_order: bool,
    /// The refund includes the delivery fee.
    pub includes_delivery_fee: bool,
}

/// One cancellation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    pub transaction_id: PaymentId,
    pub reason: CancelReason,
    /// Cash amount to return. May be lower than the charge.
    pub refund_amount: Money,
    pub scope_flags: ScopeFlags,
    /// Same key for the same logical cancellation; the gateway drops repeats.
    pub idempotency_key: String,
}

/// Gateway verdict on a cancellation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPaymentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CancelPaymentResponse {
    /// The gateway cancelled the payment.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// The gateway refused.
    #[must_use]
    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// External payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Cancel (fully or partially refund) one transaction.
    async fn cancel(&self, request: &CancelPaymentRequest) -> Result<CancelPaymentResponse, GatewayError>;
}
