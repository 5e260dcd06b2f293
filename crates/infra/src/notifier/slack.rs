//! Slack incoming-webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::{LowStockAlert, Notifier, NotifyError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            webhook_url: webhook_url.into(),
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: &'static str,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Attachment {
    color: &'static str,
    title: &'static str,
    text: &'static str,
    fields: Vec<Field>,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct Field {
    title: &'static str,
    value: String,
    short: bool,
}

impl Field {
    fn short(title: &'static str, value: impl ToString) -> Self {
        Self {
            title,
            value: value.to_string(),
            short: true,
        }
    }
}

fn render(alert: &LowStockAlert) -> SlackMessage {
    SlackMessage {
        text: "⚠️ Low Stock Alert",
        attachments: vec![Attachment {
            color: "danger",
            title: "Low Stock Alert",
            text: "Stock level has fallen below threshold",
            fields: vec![
                Field::short("SKU", &alert.sku),
                Field::short("Warehouse ID", alert.warehouse_id),
                Field::short("Current Stock", alert.stock_quantity),
                Field::short("Threshold", alert.threshold),
            ],
            ts: alert.timestamp.timestamp(),
        }],
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    #[instrument(
        skip(self, alert),
        fields(sku = %alert.sku, warehouse_id = %alert.warehouse_id),
        err
    )]
    async fn notify_low_stock(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&render(alert))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("slack webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!("slack notification sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "slack webhook rejected notification");
        Err(NotifyError::Status(status.as_u16()))
    }
}
