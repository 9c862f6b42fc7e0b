//! Payment notifications from the gateway.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::middleware::{SIGNATURE_HEADER, verify_signature};
use crate::services::GatewayNotification;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/gateway/events", post(gateway_event))
}

#[derive(Debug, Serialize)]
pub struct GatewayEventResponse {
    pub success: bool,
    pub changed: bool,
}

/// Apply a `paid` / `failed` / `cancelled` notification.
///
/// POST /api/gateway/events
async fn gateway_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GatewayEventResponse>> {
    if let Some(secret) = state.webhook_secret() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        verify_signature(secret, &body, signature)?;
    }

    let notification: GatewayNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid notification: {e}")))?;

    let changed = state.orders().apply_gateway_event(&notification).await?;
    Ok(Json(GatewayEventResponse {
        success: true,
        changed,
    }))
}
