//! Low-stock alert delivery.
//!
//! Delivery is best-effort: callers log a [`NotifyError`] and move on.

pub mod recording;
pub mod slack;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use omnistock_core::{Sku, WarehouseId};

pub use recording::RecordingNotifier;
pub use slack::SlackNotifier;

/// Payload of one low-stock alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub stock_quantity: i64,
    pub threshold: i64,
    pub timestamp: DateTime<Utc>,
}

impl LowStockAlert {
    pub fn new(sku: Sku, warehouse_id: WarehouseId, stock_quantity: i64, threshold: i64) -> Self {
        Self {
            sku,
            warehouse_id,
            stock_quantity,
            threshold,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification endpoint returned status {0}")]
    Status(u16),

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_low_stock(&self, alert: &LowStockAlert) -> Result<(), NotifyError>;
}

#[async_trait]
impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    async fn notify_low_stock(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        (**self).notify_low_stock(alert).await
    }
}

/// Writes alerts to the log instead of delivering them anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_low_stock(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        warn!(
            sku = %alert.sku,
            warehouse_id = %alert.warehouse_id,
            stock_quantity = alert.stock_quantity,
            threshold = alert.threshold,
            "low stock"
        );
        Ok(())
    }
}
