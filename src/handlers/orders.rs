use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    services::catalog::RequestedItem,
    services::orders::{subtotal, PromoSnapshot},
    services::promos::compute_discount,
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    /// Catalog product id
    #[schema(example = "rose-bouquet")]
    pub product_id: String,
    #[schema(example = 2)]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    /// Free-form contact block (name, phone, address, comment)
    pub customer: serde_json::Value,
    #[schema(example = "SALE10")]
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: String,
    pub title: String,
    /// Unit price in minor currency units, as captured at order time
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AppliedPromoView {
    pub code: String,
    pub discount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Total in minor currency units
    pub amount: i64,
    pub items: Vec<OrderItemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo: Option<AppliedPromoView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create a new order. Prices come from the catalog; any client-supplied price is ignored.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip_all, fields(item_count = request.items.len()))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;

    let requested: Vec<RequestedItem> = request
        .items
        .iter()
        .map(|item| RequestedItem {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        })
        .collect();

    let resolved = state.services.catalog.resolve_items(&requested).await?;

    // An unusable promo code never blocks the order; it just does not apply.
    let promo = match request.promo_code.as_deref() {
        Some(code) => state
            .services
            .promos
            .find_usable(code, Utc::now())
            .await?
            .map(|promo| {
                let breakdown =
                    compute_discount(subtotal(&resolved), promo.discount_type, promo.value);
                PromoSnapshot {
                    code: promo.code,
                    discount: breakdown.discount,
                }
            }),
        None => None,
    };

    let order = state
        .services
        .orders
        .create_order(&resolved, request.customer, promo)
        .await?;

    let items = state
        .services
        .orders
        .get_order_with_items(order.id)
        .await?
        .map(|(_, items)| items)
        .unwrap_or_default();

    state
        .services
        .notifications
        .notify_order_placed(&order, &items)
        .await;

    let body = OrderResponse {
        order_id: order.id,
        status: order.status,
        amount: order.amount,
        items: items
            .into_iter()
            .map(|item| OrderItemView {
                product_id: item.product_id,
                title: item.title,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect(),
        promo: match (order.promo_code, order.promo_discount) {
            (Some(code), Some(discount)) => Some(AppliedPromoView { code, discount }),
            _ => None,
        },
        payment_id: order.payment_id,
        created_at: order.created_at,
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::success(body))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    description = "Get an order with its line items by id",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .services
        .orders
        .get_order_with_items(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

    let body = OrderResponse {
        order_id: order.id,
        status: order.status,
        amount: order.amount,
        items: items
            .into_iter()
            .map(|item| OrderItemView {
                product_id: item.product_id,
                title: item.title,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect(),
        promo: match (order.promo_code, order.promo_discount) {
            (Some(code), Some(discount)) => Some(AppliedPromoView { code, discount }),
            _ => None,
        },
        payment_id: order.payment_id,
        created_at: order.created_at,
    };

    Ok(Json(ApiResponse::success(body)))
}
