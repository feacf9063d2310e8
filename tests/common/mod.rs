use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Map, Value};
use tower::ServiceExt;
use uuid::Uuid;

use blossom_api::{
    app_router,
    config::{AppConfig, GatewaySettings},
    db,
    entities::promo_code::DiscountType,
    entities::{product, promo_code},
    handlers::AppServices,
    rate_limiter::RateLimitConfig,
    services::gateway::{compute_token, GatewayClient},
    services::notifications::{MessageSink, NotifyError},
    AppState,
};

pub const TEST_TERMINAL_KEY: &str = "term-test";
pub const TEST_TERMINAL_PASSWORD: &str = "secret";

/// Gateway settings pointed at `base_url`, signed with the test credentials.
pub fn gateway_settings(base_url: &str) -> GatewaySettings {
    GatewaySettings {
        base_url: base_url.to_string(),
        terminal_key: TEST_TERMINAL_KEY.to_string(),
        terminal_password: Some(TEST_TERMINAL_PASSWORD.to_string()),
        timeout_secs: 2,
        success_url: Some("https://shop.example.com/paid".to_string()),
        fail_url: Some("https://shop.example.com/failed".to_string()),
        notification_url: Some("https://shop.example.com/api/v1/payments/webhook".to_string()),
    }
}

/// Sink that records every message instead of delivering it.
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .expect("sink mutex poisoned")
            .push(text.to_string());
        Ok(())
    }
}

/// Helper harness backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub sink: RecordingSink,
}

impl TestApp {
    /// Construct a test application with fresh database state and the default
    /// gateway settings (no live gateway; outbound calls would fail fast).
    pub async fn new() -> Self {
        Self::with_gateway_base_url("http://127.0.0.1:9/gateway").await
    }

    /// Construct a test application whose gateway client points at `base_url`
    /// (a wiremock server in gateway tests).
    pub async fn with_gateway_base_url(base_url: &str) -> Self {
        Self::build(base_url, 10_000).await
    }

    /// Construct a test application with a small request budget per window.
    pub async fn with_rate_limit(requests_per_window: u32) -> Self {
        Self::build("http://127.0.0.1:9/gateway", requests_per_window).await
    }

    async fn build(base_url: &str, requests_per_window: u32) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 18_080, "test");
        // An in-memory SQLite database lives and dies with its connection.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.rate_limit_requests_per_window = requests_per_window;
        cfg.gateway = gateway_settings(base_url);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create test schema");

        let db_arc = Arc::new(pool);
        let gateway = Arc::new(GatewayClient::new(cfg.gateway.clone()).expect("gateway client"));
        let sink = RecordingSink::default();

        let services = AppServices::new(
            db_arc.clone(),
            gateway,
            Arc::new(sink.clone()),
            RateLimitConfig {
                requests_per_window: cfg.rate_limit_requests_per_window,
                window: Duration::from_secs(cfg.rate_limit_window_seconds),
            },
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };

        let app = Self {
            router: app_router(state.clone()),
            state,
            sink,
        };
        app.seed_catalog().await;
        app
    }

    /// Seeds the catalog and promos every lifecycle test relies on:
    /// two active products, one retired product, one live and one expired
    /// promo code.
    async fn seed_catalog(&self) {
        self.seed_product("rose-bouquet", "Rose bouquet", 1000, true)
            .await;
        self.seed_product("tulip-box", "Tulip box", 1500, true).await;
        self.seed_product("peony-crate", "Peony crate", 3000, false)
            .await;

        self.seed_promo("SALE10", DiscountType::Percent, 10, true, None, None)
            .await;
        self.seed_promo(
            "BYGONE",
            DiscountType::Percent,
            10,
            true,
            None,
            Some(Utc::now() - chrono::Duration::days(1)),
        )
        .await;
    }

    pub async fn seed_product(&self, id: &str, name: &str, price: i64, is_active: bool) {
        product::ActiveModel {
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
    }

    pub async fn seed_promo(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: i64,
        is_active: bool,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) {
        promo_code::ActiveModel {
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            value: Set(value),
            is_active: Set(is_active),
            starts_at: Set(starts_at),
            ends_at: Set(ends_at),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed promo");
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a raw (non-JSON-checked) body to an endpoint.
    pub async fn request_raw(&self, method: Method, uri: &str, body: &str) -> axum::response::Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Place an order over HTTP and return the parsed response body.
    pub async fn place_order(&self, items: Value, promo_code: Option<&str>) -> Value {
        let mut payload = json!({
            "items": items,
            "customer": { "name": "Anna", "phone": "+7 900 000-00-00" },
        });
        if let Some(code) = promo_code {
            payload["promo_code"] = json!(code);
        }

        let response = self
            .request(Method::POST, "/api/v1/orders", Some(payload))
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        read_json(response).await
    }
}

/// Read and parse a JSON response body.
pub async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("parse response body")
}

/// Builds a correctly signed webhook payload the way the gateway does:
/// top-level scalars (booleans rendered lowercase) keyed and sorted, password
/// appended, SHA-256 over the concatenated values.
pub fn signed_webhook_payload(
    order_id: Uuid,
    status: &str,
    success: bool,
    payment_id: i64,
) -> Value {
    let mut payload = Map::new();
    payload.insert("TerminalKey".to_string(), json!(TEST_TERMINAL_KEY));
    payload.insert("OrderId".to_string(), json!(order_id.to_string()));
    payload.insert("Status".to_string(), json!(status));
    payload.insert("Success".to_string(), json!(success));
    payload.insert("PaymentId".to_string(), json!(payment_id));

    let fields: Vec<(&str, String)> = payload
        .iter()
        .map(|(key, value)| {
            let fragment = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => panic!("unsupported payload value: {other}"),
            };
            (key.as_str(), fragment)
        })
        .collect();
    let token = compute_token(&fields, TEST_TERMINAL_PASSWORD);
    payload.insert("Token".to_string(), json!(token));

    Value::Object(payload)
}
