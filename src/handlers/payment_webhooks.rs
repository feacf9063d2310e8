use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{NotificationKind, OrderStatus},
    errors::ServiceError,
    services::gateway::GatewayError,
    services::order_status::{next_status, GatewayPaymentStatus},
    AppState,
};

/// Inbound payment-gateway callback.
///
/// Always acknowledged with `200 OK` regardless of what processing did: the
/// gateway treats anything else as delivery failure and keeps retrying, and a
/// malformed or forged payload should be dropped, not redelivered. Problems
/// are recorded in the log instead.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Payment gateway webhook",
    description = "Signed payment-state callback from the gateway. Always acknowledged with 200 OK.",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Acknowledged", body = String),
    )
)]
#[instrument(skip_all)]
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if let Err(e) = process_webhook(&state, &body).await {
        error!(error = %e, "webhook processing failed; acknowledging anyway");
    }
    (StatusCode::OK, "OK")
}

async fn process_webhook(state: &AppState, body: &Bytes) -> Result<(), ServiceError> {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "webhook body is not valid JSON; discarding");
            return Ok(());
        }
    };
    let payload = match payload.as_object() {
        Some(map) => map,
        None => {
            warn!("webhook body is not a JSON object; discarding");
            return Ok(());
        }
    };

    match state.services.gateway.verify_webhook(payload) {
        Ok(true) => {}
        Ok(false) => {
            warn!("webhook token verification failed; discarding event");
            return Ok(());
        }
        Err(GatewayError::Misconfigured) => {
            error!("terminal password is not configured; all webhooks are being discarded");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let order_id = match payload
        .get("OrderId")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        Some(id) => id,
        None => {
            warn!("verified webhook carries no parseable OrderId; discarding");
            return Ok(());
        }
    };

    let status = GatewayPaymentStatus::parse(
        payload.get("Status").and_then(Value::as_str).unwrap_or(""),
    );
    let success = payload
        .get("Success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let payment_id = payload.get("PaymentId").and_then(payment_id_fragment);

    let order = match state.services.orders.get_order(order_id).await? {
        Some(order) => order,
        None => {
            warn!(%order_id, "webhook references an unknown order; discarding");
            return Ok(());
        }
    };

    let target = match next_status(order.status, &status, success) {
        Some(target) => target,
        None => {
            debug!(
                %order_id,
                gateway_status = status.as_str(),
                "webhook produced no transition"
            );
            return Ok(());
        }
    };

    let won = state
        .services
        .orders
        .transition_status(order_id, order.status, target, payment_id.as_deref())
        .await?;

    if !won {
        debug!(%order_id, "concurrent delivery already applied this transition");
        return Ok(());
    }

    let (kind, detail) = match target {
        OrderStatus::Paid => (
            NotificationKind::PaymentSuccess,
            payment_id.clone().unwrap_or_default(),
        ),
        _ => (
            NotificationKind::PaymentFailed,
            status.as_str().to_string(),
        ),
    };
    state
        .services
        .notifications
        .notify_payment_outcome(&order, kind, &detail)
        .await;

    Ok(())
}

/// `PaymentId` arrives as a JSON number or a string depending on the gateway
/// version.
fn payment_id_fragment(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
