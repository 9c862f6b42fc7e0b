//! Order write endpoints and the refund quote.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use dosirak_core::{
    AdditionalOrder, CancelScope, Checkout, Money, Order, OrderId, OrderStatus, PaymentId,
    PaymentStatus, RefundRate, TrackingInfo,
};

use crate::error::{Result, add_breadcrumb};
use crate::middleware::{RequestId, RequireActor};
use crate::services::{CancelOrder, CancellationResult, RefundQuote};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(place_order))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/status", post(update_status))
        .route("/api/orders/{id}/cancel", post(cancel_order))
        .route("/api/orders/{id}/additional-orders", post(add_additional_order))
        .route(
            "/api/orders/{id}/allow-additional-order",
            put(set_allow_additional_order),
        )
        .route("/api/orders/{id}/refund-quote", get(refund_quote))
}

/// Body of `POST /api/orders/{id}/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub target_status: OrderStatus,
    pub reason: Option<String>,
    pub tracking_info: Option<TrackingInfo>,
    #[serde(default)]
    pub acknowledged_refund_policy: bool,
}

/// Reply to a status change.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub order_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<RefundRate>,
}

/// Reply to a cancellation.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: CancellationResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowAdditionalOrderRequest {
    pub allow: bool,
}

#[derive(Debug, Serialize)]
pub struct AllowAdditionalOrderResponse {
    pub success: bool,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalOrderResponse {
    pub success: bool,
    pub payment_id: PaymentId,
}

/// `?paymentId=` selects one group; without it the quote covers the whole order.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundQuoteQuery {
    pub payment_id: Option<PaymentId>,
}

/// Open an order from a completed checkout.
///
/// POST /api/orders
async fn place_order(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Json(checkout): Json<Checkout>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.orders().place_order(&actor, checkout).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
) -> Result<Json<Order>> {
    let order = state.orders().get_order(&OrderId::new(id), &actor).await?;
    Ok(Json(order))
}

/// Move an order to a new status.
///
/// POST /api/orders/{id}/status
///
/// Cancellation statuses run the full cancellation (refunds first). The
/// refund window is checked before the `reason`.
async fn update_status(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<StatusResponse>> {
    let order_id = OrderId::new(id);
    add_breadcrumb(
        "order",
        "Status change requested",
        &[
            ("order_id", order_id.as_str()),
            ("target", request.target_status.as_str()),
        ],
    );

    if request.target_status.is_cancellation() {
        // A missing reason is judged with the other cancellation checks.
        let reason = request.reason.as_deref().unwrap_or_default();
        let result = state
            .orders()
            .cancel_to(
                &order_id,
                &actor,
                request.target_status,
                reason,
                request.acknowledged_refund_policy,
            )
            .await?;
        return Ok(Json(StatusResponse {
            success: true,
            order_status: result.order_status,
            payment_status: Some(result.payment_status),
            refund_amount: Some(result.refund_amount),
            rate: Some(result.rate),
        }));
    }

    let change = state
        .orders()
        .advance_status(&order_id, &actor, request.target_status, request.tracking_info)
        .await?;
    Ok(Json(StatusResponse {
        success: true,
        order_status: change.to,
        payment_status: None,
        refund_amount: None,
        rate: None,
    }))
}

/// Cancel the whole order or one payment group.
///
/// POST /api/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
    request_id: Option<Extension<RequestId>>,
    Json(request): Json<CancelOrder>,
) -> Result<Json<CancelResponse>> {
    let order_id = OrderId::new(id);
    let scope = request.scope.to_string();
    let request_id = request_id.map(|Extension(RequestId(id))| id).unwrap_or_default();
    add_breadcrumb(
        "order",
        "Cancellation requested",
        &[
            ("order_id", order_id.as_str()),
            ("scope", &scope),
            ("request_id", &request_id),
        ],
    );

    let result = state.orders().cancel(&order_id, &actor, &request).await?;
    Ok(Json(CancelResponse {
        success: true,
        result,
    }))
}

/// POST /api/orders/{id}/additional-orders
async fn add_additional_order(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
    Json(additional): Json<AdditionalOrder>,
) -> Result<(StatusCode, Json<AdditionalOrderResponse>)> {
    let payment_id = state
        .orders()
        .add_additional_order(&OrderId::new(id), &actor, additional)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AdditionalOrderResponse {
            success: true,
            payment_id,
        }),
    ))
}

/// PUT /api/orders/{id}/allow-additional-order
async fn set_allow_additional_order(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
    Json(request): Json<AllowAdditionalOrderRequest>,
) -> Result<Json<AllowAdditionalOrderResponse>> {
    let changed = state
        .orders()
        .set_allow_additional_order(&OrderId::new(id), &actor, request.allow)
        .await?;
    Ok(Json(AllowAdditionalOrderResponse {
        success: true,
        changed,
    }))
}

/// GET /api/orders/{id}/refund-quote
async fn refund_quote(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Path(id): Path<String>,
    Query(query): Query<RefundQuoteQuery>,
) -> Result<Json<RefundQuote>> {
    let scope = query.payment_id.map_or(CancelScope::All, CancelScope::One);
    let quote = state
        .orders()
        .refund_quote(&OrderId::new(id), &actor, &scope)
        .await?;
    Ok(Json(quote))
}
