//! HTTP client for the payment gateway's cancel endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use rust_decimal::prelude::ToPrimitive;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::GatewayConfig;

use super::{CancelPaymentRequest, CancelPaymentResponse, GatewayError, PaymentGateway, ScopeFlags};

/// Gateway client over HTTPS.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    inner: Arc<HttpPaymentGatewayInner>,
}

struct HttpPaymentGatewayInner {
    client: reqwest::Client,
    base_url: Url,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Wire body of a cancel call. Amounts travel as integer won.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    cancel_reason: &'a str,
    cancel_amount: i64,
    #[serde(flatten)]
    scope: ScopeFlags,
}

impl<'a> CancelBody<'a> {
    fn new(request: &'a CancelPaymentRequest) -> Result<Self, GatewayError> {
        let amount = request.refund_amount;
        let cancel_amount = amount
            .is_whole()
            .then(|| amount.amount().to_i64())
            .flatten()
            .ok_or_else(|| GatewayError::InvalidAmount(amount.to_string()))?;
        Ok(Self {
            cancel_reason: request.reason.as_str(),
            cancel_amount,
            scope: request.scope_flags,
        })
    }
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpPaymentGateway {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the auth header is malformed or the HTTP client fails to build.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();

        // Basic auth with the secret key as user and an empty password
        let credentials = STANDARD.encode(format!("{}:", config.secret_key.expose_secret()));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {credentials}"))
                .map_err(|e| GatewayError::Config(format!("invalid secret key: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpPaymentGatewayInner {
                client,
                base_url: config.base_url.clone(),
            }),
        })
    }

    fn cancel_url(&self, request: &CancelPaymentRequest) -> Result<Url, GatewayError> {
        self.inner
            .base_url
            .join(&format!("v1/payments/{}/cancel", request.transaction_id))
            .map_err(|e| GatewayError::Config(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(
        skip(self, request),
        fields(
            transaction_id = %request.transaction_id,
            refund_amount = %request.refund_amount,
        )
    )]
    async fn cancel(&self, request: &CancelPaymentRequest) -> Result<CancelPaymentResponse, GatewayError> {
        let body = CancelBody::new(request)?;

        let response = self
            .inner
            .client
            .post(self.cancel_url(request)?)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("gateway accepted cancellation");
            return Ok(CancelPaymentResponse::ok());
        }

        let text = response.text().await?;
        let message = match serde_json::from_str::<GatewayErrorBody>(&text) {
            Ok(GatewayErrorBody { code, message }) => match (code, message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (code, message) => message.or(code).unwrap_or_else(|| status.to_string()),
            },
            Err(_) => format!("gateway returned {status}"),
        };
        warn!(%status, %message, "gateway refused cancellation");

        Ok(CancelPaymentResponse::refused(message))
    }
}
