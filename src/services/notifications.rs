use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::entities::order::{Model as OrderModel, NotificationKind};
use crate::entities::order_item::Model as OrderItemModel;
use crate::services::orders::OrderService;

/// Hard cap of the messaging sink; longer texts are truncated before sending.
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sink rejected the message: {0}")]
    Sink(String),
}

/// A single message-delivery capability. Parameterized by a configured
/// destination; implementations must not retry internally.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError>;
}

/// Telegram bot API sink.
pub struct TelegramSink {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Sink(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

/// Sink used when no messaging channel is configured; messages go to the log.
pub struct NoopSink;

#[async_trait]
impl MessageSink for NoopSink {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        debug!(message = text, "messaging sink not configured; dropping notification");
        Ok(())
    }
}

/// Truncates a message to the sink maximum on a character boundary.
pub fn truncate_message(text: &str) -> &str {
    if text.len() <= MAX_MESSAGE_LEN {
        return text;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// `2500` minor units -> `"25.00"`.
fn fmt_amount(minor_units: i64) -> String {
    format!("{}.{:02}", minor_units / 100, (minor_units % 100).abs())
}

fn customer_line(customer: &serde_json::Value) -> String {
    let mut parts = Vec::new();
    for key in ["name", "phone", "address"] {
        if let Some(value) = customer.get(key).and_then(|v| v.as_str()) {
            if !value.trim().is_empty() {
                parts.push(value.trim().to_string());
            }
        }
    }
    if parts.is_empty() {
        "—".to_string()
    } else {
        parts.join(", ")
    }
}

/// Human-readable message for a freshly placed order.
pub fn format_order_placed(order: &OrderModel, items: &[OrderItemModel]) -> String {
    let mut lines = vec![
        format!("New order {}", order.id),
        format!("Customer: {}", customer_line(&order.customer)),
    ];
    for item in items {
        lines.push(format!(
            "- {} × {} @ {}",
            item.title,
            item.quantity,
            fmt_amount(item.unit_price)
        ));
    }
    if let (Some(code), Some(discount)) = (&order.promo_code, order.promo_discount) {
        lines.push(format!("Promo {}: -{}", code, fmt_amount(discount)));
    }
    lines.push(format!("Total: {}", fmt_amount(order.amount)));
    lines.join("\n")
}

pub fn format_payment_success(order: &OrderModel, payment_id: Option<&str>) -> String {
    let mut text = format!(
        "Payment received for order {} — {}",
        order.id,
        fmt_amount(order.amount)
    );
    if let Some(payment_id) = payment_id {
        text.push_str(&format!(" (payment {})", payment_id));
    }
    text
}

pub fn format_payment_failed(order: &OrderModel, reason: &str) -> String {
    format!(
        "Payment FAILED for order {} — {} ({})",
        order.id,
        fmt_amount(order.amount),
        reason
    )
}

/// Formats and best-effort delivers operational notifications. Delivery
/// failures are logged and swallowed; order creation and webhook processing
/// must succeed even when the messaging channel is down.
pub struct NotificationService {
    sink: Arc<dyn MessageSink>,
    orders: OrderService,
}

impl NotificationService {
    pub fn new(sink: Arc<dyn MessageSink>, orders: OrderService) -> Self {
        Self { sink, orders }
    }

    async fn deliver(&self, text: String) {
        let text = truncate_message(&text).to_string();
        if let Err(e) = self.sink.send_message(&text).await {
            warn!(error = %e, "notification delivery failed");
        }
    }

    /// Announces order creation. No idempotency flag here: the order is
    /// created exactly once inside a transaction.
    #[instrument(skip_all, fields(order_id = %order.id))]
    pub async fn notify_order_placed(&self, order: &OrderModel, items: &[OrderItemModel]) {
        self.deliver(format_order_placed(order, items)).await;
    }

    /// Announces a payment outcome at most once per order and kind: the
    /// atomic flag on the order row decides which caller sends. Duplicate
    /// gateway callbacks lose the check-and-set and stay silent.
    #[instrument(skip_all, fields(order_id = %order.id, ?kind))]
    pub async fn notify_payment_outcome(
        &self,
        order: &OrderModel,
        kind: NotificationKind,
        detail: &str,
    ) {
        let should_send = match self.orders.try_mark_notified(order.id, kind).await {
            Ok(won) => won,
            Err(e) => {
                warn!(error = %e, "notification idempotency check failed; skipping send");
                false
            }
        };
        if !should_send {
            debug!("notification already sent for this order and kind");
            return;
        }

        let text = match kind {
            NotificationKind::PaymentSuccess => {
                format_payment_success(order, order.payment_id.as_deref().or(Some(detail)))
            }
            NotificationKind::PaymentFailed => format_payment_failed(order, detail),
        };
        self.deliver(text).await;
    }
}
