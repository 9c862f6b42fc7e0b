//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Domain errors go back to the
//! caller with their policy reason; infrastructure errors are captured to
//! Sentry and answered with a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use dosirak_core::OrderError;

use crate::db::RepositoryError;
use crate::services::ServiceError;

/// Application-level error type for the order API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Domain rule rejected the request.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// No actor context on the request.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Order(e) => Self::Order(e),
            ServiceError::Repository(e) => Self::Database(e),
        }
    }
}

/// JSON body for failed requests.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Order(err) => match err {
                OrderError::InvalidTransition { .. } => StatusCode::CONFLICT,
                OrderError::PreconditionNotMet(_) | OrderError::PastCancellationWindow { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                OrderError::GatewayCancellationFailed { .. } => StatusCode::BAD_GATEWAY,
                OrderError::OrderNotFound(_) | OrderError::PaymentGroupNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                OrderError::Unauthorized(_) => StatusCode::FORBIDDEN,
            },
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Database(RepositoryError::Database(_) | RepositoryError::DataCorruption(_))
                | Self::Internal(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_infrastructure() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else if let Self::Order(OrderError::GatewayCancellationFailed { .. }) = &self {
            tracing::warn!(error = %self, "Cancellation stopped partway");
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let message = if self.is_infrastructure() {
            "Internal server error".to_string()
        } else {
            match &self {
                Self::Order(err) => err.to_string(),
                Self::Database(RepositoryError::Conflict(msg)) => msg.clone(),
                _ => self.to_string(),
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for an order action.
///
/// Breadcrumbs show up in Sentry reports as the trail leading to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use dosirak_core::{OrderId, OrderStatus, PaymentId};

    use super::*;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_order_error_status_codes() {
        assert_eq!(
            status_of(OrderError::InvalidTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::Preparing,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrderError::precondition("reason required")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(OrderError::PastCancellationWindow {
                delivery_date: NaiveDate::from_ymd_opt(2026, 10, 5).unwrap_or_default(),
                days_left: 1,
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(OrderError::GatewayCancellationFailed {
                cancelled: vec![],
                remaining: vec![PaymentId::new("tx-1")],
                message: "declined".to_string(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(OrderError::OrderNotFound(OrderId::new("x"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::PaymentGroupNotFound(PaymentId::new("x"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::unauthorized("not yours")),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            status_of(AppError::Unauthenticated("missing".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::BadRequest("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(RepositoryError::Conflict("dup".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RepositoryError::DataCorruption("bad row".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_infrastructure_details_are_hidden() {
        let response = AppError::Database(RepositoryError::DataCorruption(
            "orders.delivery is not an object".to_string(),
        ))
        .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_policy_reason_is_returned() {
        let response = AppError::Order(OrderError::precondition("the reason must not be empty"))
            .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(body["error"], "the reason must not be empty");
    }
}
