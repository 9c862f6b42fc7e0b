//! Role-scoped order listings.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::NaiveDate;
use serde::Deserialize;

use dosirak_core::projection::{BuyerBucket, SellerBucket, SellerFilter};
use dosirak_core::{DeliveryMethod, Order, Role, StoreId};

use crate::error::{AppError, Result};
use crate::middleware::RequireActor;
use crate::services::AdminOverview;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/views/buyer", get(buyer))
        .route("/api/views/seller", get(seller))
        .route("/api/views/admin", get(admin))
}

#[derive(Debug, Deserialize)]
pub struct BuyerQuery {
    pub bucket: Option<BuyerBucket>,
}

/// Query string for the seller and admin dashboards.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    /// Required for admins on the seller view; ignored for sellers.
    pub store_id: Option<StoreId>,
    #[serde(default)]
    pub bucket: SellerBucket,
    pub delivery_method: Option<DeliveryMethod>,
    pub delivery_from: Option<NaiveDate>,
    pub delivery_to: Option<NaiveDate>,
}

impl DashboardQuery {
    fn filter(&self) -> Result<SellerFilter> {
        if let (Some(from), Some(to)) = (self.delivery_from, self.delivery_to) {
            if from > to {
                return Err(AppError::BadRequest(
                    "deliveryFrom must not be after deliveryTo".to_string(),
                ));
            }
        }
        Ok(SellerFilter {
            bucket: self.bucket,
            delivery_method: self.delivery_method,
            delivery_from: self.delivery_from,
            delivery_to: self.delivery_to,
        })
    }
}

/// GET /api/views/buyer
async fn buyer(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Query(query): Query<BuyerQuery>,
) -> Result<Json<Vec<Order>>> {
    let orders = state.orders().buyer_orders(&actor, query.bucket).await?;
    Ok(Json(orders))
}

/// GET /api/views/seller
///
/// Sellers always see their own store.
async fn seller(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Vec<Order>>> {
    let store_id = match actor.role {
        Role::Seller => StoreId::new(actor.id.clone()),
        _ => query
            .store_id
            .clone()
            .ok_or_else(|| AppError::BadRequest("storeId is required".to_string()))?,
    };
    let orders = state
        .orders()
        .seller_orders(&actor, &store_id, &query.filter()?)
        .await?;
    Ok(Json(orders))
}

/// GET /api/views/admin
async fn admin(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<AdminOverview>> {
    let overview = state
        .orders()
        .admin_overview(&actor, query.store_id.as_ref(), &query.filter()?)
        .await?;
    Ok(Json(overview))
}
