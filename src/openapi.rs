use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Blossom API",
        version = "1.0.0",
        description = r#"
# Blossom Order & Payment API

Backend for the flower-delivery storefront: order intake with catalog-priced
line items and promo codes, card-payment sessions at the external gateway,
signed payment webhooks and operator notifications.

## Money

All amounts are integers in the smallest currency unit (e.g. kopecks).

## Rate Limiting

Requests are rate-limited per client IP; over-limit requests receive `429`.

## Error Handling

Failing endpoints return a consistent body:

```json
{
  "error": "Bad Request",
  "message": "Validation error: unknown or unavailable product: x",
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order intake and lookup"),
        (name = "Payments", description = "Payment sessions and gateway callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::payments::init_payment,
        crate::handlers::payments::payment_status,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::OrderItemRequest,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemView,
            crate::handlers::orders::AppliedPromoView,
            crate::handlers::payments::InitPaymentRequest,
            crate::handlers::payments::InitPaymentResponse,
            crate::handlers::payments::PaymentStatusResponse,
            crate::entities::order::OrderStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
