use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::GatewaySettings;
use crate::errors::ServiceError;
use crate::services::order_status::GatewayPaymentStatus;

/// Tagged error channel for gateway calls. Callers branch on the variant; a
/// failed call never changes order state on its own.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment terminal credentials are not configured")]
    Misconfigured,

    #[error("gateway request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("gateway rejected the request: [{code}] {message}")]
    Rejected { code: String, message: String },

    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Misconfigured => {
                ServiceError::InternalError("payment terminal is not configured".to_string())
            }
            GatewayError::Rejected { .. } => ServiceError::PaymentFailed(err.to_string()),
            GatewayError::Network(_) | GatewayError::MalformedResponse(_) => {
                ServiceError::ExternalServiceError(err.to_string())
            }
        }
    }
}

/// Parameters for initializing a payment session.
#[derive(Clone, Debug)]
pub struct InitPayment {
    pub amount: i64,
    pub order_id: Uuid,
    pub description: String,
    pub success_url: Option<String>,
    pub fail_url: Option<String>,
    pub notification_url: Option<String>,
}

/// A successfully initialized payment session.
#[derive(Clone, Debug)]
pub struct PaymentSession {
    pub payment_id: String,
    pub payment_url: String,
}

/// Current state of a payment session as reported by the gateway.
#[derive(Clone, Debug)]
pub struct PaymentState {
    pub status: GatewayPaymentStatus,
    pub success: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitRequestBody {
    terminal_key: String,
    amount: i64,
    order_id: String,
    description: String,
    #[serde(rename = "SuccessURL", skip_serializing_if = "Option::is_none")]
    success_url: Option<String>,
    #[serde(rename = "FailURL", skip_serializing_if = "Option::is_none")]
    fail_url: Option<String>,
    #[serde(rename = "NotificationURL", skip_serializing_if = "Option::is_none")]
    notification_url: Option<String>,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitResponseBody {
    success: bool,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "PaymentURL", default)]
    payment_url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    payment_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetStateRequestBody {
    terminal_key: String,
    payment_id: String,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetStateResponseBody {
    success: bool,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// The gateway sends `PaymentId` as either a JSON number or a string.
fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Renders a payload value the way the gateway does when signing: booleans
/// lowercase, numbers as written, strings as-is.
fn token_fragment(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Nested objects/arrays (receipts etc.) do not participate in the token.
        _ => None,
    }
}

/// Computes the integrity token over `(key, value)` pairs: the shared password
/// is added under the `Password` key, pairs are sorted by key, their values
/// concatenated and hashed with SHA-256 (lowercase hex).
pub fn compute_token(fields: &[(&str, String)], password: &str) -> String {
    let mut pairs: Vec<(&str, &str)> = fields
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .chain(std::iter::once(("Password", password)))
        .collect();
    pairs.sort_by_key(|(k, _)| *k);

    let mut hasher = Sha256::new();
    for (_, v) in pairs {
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Recomputes the expected token for a webhook payload and compares it
/// against the payload's `Token` field in constant time. All top-level scalar
/// fields except `Token` participate.
pub fn verify_notification_token(payload: &Map<String, Value>, password: &str) -> bool {
    let presented = match payload.get("Token").and_then(Value::as_str) {
        Some(token) => token,
        None => return false,
    };

    let fields: Vec<(&str, String)> = payload
        .iter()
        .filter(|(key, _)| key.as_str() != "Token")
        .filter_map(|(key, value)| token_fragment(value).map(|v| (key.as_str(), v)))
        .collect();

    let expected = compute_token(&fields, password);
    constant_time_eq(&expected, presented)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Thin client for the external card-payment gateway. Network calls only; it
/// never mutates order state.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    settings: GatewaySettings,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { http, settings })
    }

    fn password(&self) -> Result<&str, GatewayError> {
        self.settings
            .terminal_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(GatewayError::Misconfigured)
    }

    fn require_terminal_key(&self) -> Result<&str, GatewayError> {
        if self.settings.terminal_key.is_empty() {
            return Err(GatewayError::Misconfigured);
        }
        Ok(&self.settings.terminal_key)
    }

    /// Verifies an inbound webhook payload against the configured password.
    /// With no password configured nothing verifies: an unset secret is a
    /// configuration error, never a bypass.
    pub fn verify_webhook(&self, payload: &Map<String, Value>) -> Result<bool, GatewayError> {
        let password = self.password()?;
        Ok(verify_notification_token(payload, password))
    }

    /// Initializes a payment session and returns the redirect URL.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    pub async fn init(&self, request: InitPayment) -> Result<PaymentSession, GatewayError> {
        let terminal_key = self.require_terminal_key()?.to_string();
        let password = self.password()?;
        let order_id = request.order_id.to_string();

        let token = compute_token(
            &[
                ("TerminalKey", terminal_key.clone()),
                ("Amount", request.amount.to_string()),
                ("OrderId", order_id.clone()),
                ("Description", request.description.clone()),
            ],
            password,
        );

        let body = InitRequestBody {
            terminal_key,
            amount: request.amount,
            order_id,
            description: request.description,
            success_url: request.success_url,
            fail_url: request.fail_url,
            notification_url: request.notification_url,
            token,
        };

        let response = self
            .http
            .post(format!("{}/Init", self.settings.base_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await?;

        let parsed: InitResponseBody = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        if !parsed.success {
            return Err(GatewayError::Rejected {
                code: parsed.error_code.unwrap_or_else(|| "unknown".to_string()),
                message: parsed
                    .message
                    .unwrap_or_else(|| "gateway returned Success=false".to_string()),
            });
        }

        match (parsed.payment_id, parsed.payment_url) {
            (Some(payment_id), Some(payment_url)) => Ok(PaymentSession {
                payment_id,
                payment_url,
            }),
            _ => Err(GatewayError::MalformedResponse(
                "successful Init without PaymentId/PaymentURL".to_string(),
            )),
        }
    }

    /// Polls the gateway for the current payment state. Used as a
    /// reconciliation path when webhook delivery is delayed; read-only.
    #[instrument(skip(self))]
    pub async fn get_state(&self, payment_id: &str) -> Result<PaymentState, GatewayError> {
        let terminal_key = self.require_terminal_key()?.to_string();
        let password = self.password()?;

        let token = compute_token(
            &[
                ("TerminalKey", terminal_key.clone()),
                ("PaymentId", payment_id.to_string()),
            ],
            password,
        );

        let body = GetStateRequestBody {
            terminal_key,
            payment_id: payment_id.to_string(),
            token,
        };

        let response = self
            .http
            .post(format!(
                "{}/GetState",
                self.settings.base_url.trim_end_matches('/')
            ))
            .json(&body)
            .send()
            .await?;

        let parsed: GetStateResponseBody = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        if !parsed.success {
            warn!(
                code = parsed.error_code.as_deref().unwrap_or("unknown"),
                "gateway GetState returned Success=false"
            );
            return Err(GatewayError::Rejected {
                code: parsed.error_code.unwrap_or_else(|| "unknown".to_string()),
                message: parsed
                    .message
                    .unwrap_or_else(|| "gateway returned Success=false".to_string()),
            });
        }

        let status = parsed
            .status
            .ok_or_else(|| GatewayError::MalformedResponse("GetState without Status".to_string()))?;

        Ok(PaymentState {
            status: GatewayPaymentStatus::parse(&status),
            success: parsed.success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook_payload(password: &str) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("TerminalKey".into(), json!("term-1"));
        payload.insert("OrderId".into(), json!("2d4f0b31-8a77-4a3c-9a57-0c5e3e2e3a11"));
        payload.insert("Status".into(), json!("CONFIRMED"));
        payload.insert("Success".into(), json!(true));
        payload.insert("PaymentId".into(), json!(700001));
        payload.insert("Amount".into(), json!(2500));

        let fields: Vec<(&str, String)> = payload
            .iter()
            .filter_map(|(k, v)| token_fragment(v).map(|f| (k.as_str(), f)))
            .collect();
        let token = compute_token(&fields, password);
        payload.insert("Token".into(), json!(token));
        payload
    }

    #[test]
    fn token_is_independent_of_field_order() {
        let a = compute_token(&[("B", "2".to_string()), ("A", "1".to_string())], "pw");
        let b = compute_token(&[("A", "1".to_string()), ("B", "2".to_string())], "pw");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_depends_on_password_and_values() {
        let base = &[("Amount", "2500".to_string())];
        assert_ne!(compute_token(base, "pw1"), compute_token(base, "pw2"));
        assert_ne!(
            compute_token(&[("Amount", "2500".to_string())], "pw"),
            compute_token(&[("Amount", "2501".to_string())], "pw"),
        );
    }

    #[test]
    fn valid_webhook_token_verifies() {
        let payload = webhook_payload("secret");
        assert!(verify_notification_token(&payload, "secret"));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut payload = webhook_payload("secret");
        payload.insert("Status".into(), json!("REJECTED"));
        assert!(!verify_notification_token(&payload, "secret"));
    }

    #[test]
    fn wrong_password_fails_verification() {
        let payload = webhook_payload("secret");
        assert!(!verify_notification_token(&payload, "other"));
    }

    #[test]
    fn missing_token_fails_verification() {
        let mut payload = webhook_payload("secret");
        payload.remove("Token");
        assert!(!verify_notification_token(&payload, "secret"));
    }

    #[test]
    fn nested_objects_do_not_participate_in_token() {
        let mut payload = webhook_payload("secret");
        payload.insert("Data".into(), json!({ "Route": "ACQ" }));
        assert!(verify_notification_token(&payload, "secret"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn unconfigured_password_is_misconfigured_not_a_bypass() {
        let client = GatewayClient::new(GatewaySettings::default()).unwrap();
        let payload = webhook_payload("secret");
        assert!(matches!(
            client.verify_webhook(&payload),
            Err(GatewayError::Misconfigured)
        ));
    }
}
