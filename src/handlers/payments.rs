use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    services::gateway::InitPayment,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitPaymentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitPaymentResponse {
    pub order_id: Uuid,
    /// Gateway-hosted payment page the customer is redirected to
    pub payment_url: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PaymentStatusQuery {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Raw gateway payment status, when a session exists and the gateway
    /// answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/init",
    summary = "Initialize payment",
    description = "Create a payment session at the gateway for an unpaid order and return the redirect URL",
    request_body = InitPaymentRequest,
    responses(
        (status = 200, description = "Payment session created", body = ApiResponse<InitPaymentResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is already settled", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway rejected the request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state), fields(order_id = %request.order_id))]
pub async fn init_payment(
    State(state): State<AppState>,
    Json(request): Json<InitPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(request.order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;

    if order.status.is_terminal() {
        return Err(ServiceError::Conflict(format!(
            "order {} is already {}",
            order.id, order.status
        )));
    }

    let session = state
        .services
        .gateway
        .init(InitPayment {
            amount: order.amount,
            order_id: order.id,
            description: format!("Flower order {}", order.id),
            success_url: state.config.gateway.success_url.clone(),
            fail_url: state.config.gateway.fail_url.clone(),
            notification_url: state.config.gateway.notification_url.clone(),
        })
        .await?;

    state
        .services
        .orders
        .set_payment_pending(order.id, &session.payment_id)
        .await?;

    Ok(Json(ApiResponse::success(InitPaymentResponse {
        order_id: order.id,
        payment_url: session.payment_url,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/status",
    summary = "Payment status",
    description = "Current order status, with the live gateway payment state when a session exists",
    params(PaymentStatusQuery),
    responses(
        (status = 200, description = "Status retrieved", body = ApiResponse<PaymentStatusResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state), fields(order_id = %query.order_id))]
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<PaymentStatusQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(query.order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", query.order_id)))?;

    // Read-only reconciliation: a gateway failure degrades the answer to the
    // stored status instead of failing the request.
    let payment_status = match order.payment_id.as_deref() {
        Some(payment_id) => match state.services.gateway.get_state(payment_id).await {
            Ok(payment_state) => Some(payment_state.status.as_str().to_string()),
            Err(e) => {
                warn!(error = %e, "gateway state lookup failed; reporting stored status only");
                None
            }
        },
        None => None,
    };

    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        order_id: order.id,
        status: order.status,
        payment_status,
    })))
}
