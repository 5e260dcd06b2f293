//! Low-stock detection for deduction events.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use omnistock_events::InventoryEvent;

use crate::ledger::{LedgerError, StockLedger};
use crate::notifier::{LowStockAlert, Notifier};

use super::EventHandler;

/// Alerts fire strictly below this quantity.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Result of checking one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// `change >= 0`: restocks never alert.
    NotADeduction,
    /// No stock row exists for the event's (SKU, warehouse).
    MissingStock,
    /// Quantity is at or above the threshold.
    Sufficient { quantity: i64 },
    /// The notifier accepted an alert.
    Alerted { quantity: i64 },
    /// An alert was due but the notifier failed.
    NotifyFailed { quantity: i64 },
}

#[derive(Debug, Clone)]
pub struct LowStockHandler<L, N> {
    ledger: L,
    notifier: N,
    threshold: i64,
}

impl<L, N> LowStockHandler<L, N>
where
    L: StockLedger,
    N: Notifier,
{
    pub fn new(ledger: L, notifier: N) -> Self {
        Self::with_threshold(ledger, notifier, DEFAULT_LOW_STOCK_THRESHOLD)
    }

    pub fn with_threshold(ledger: L, notifier: N, threshold: i64) -> Self {
        Self {
            ledger,
            notifier,
            threshold,
        }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Inspect current stock for the event's (SKU, warehouse) and alert if low.
    ///
    /// Ledger failures are returned; notifier failures are logged and folded
    /// into [`HandlerOutcome::NotifyFailed`].
    pub async fn check(&self, event: &InventoryEvent) -> Result<HandlerOutcome, LedgerError> {
        if !event.is_deduction() {
            return Ok(HandlerOutcome::NotADeduction);
        }

        let Some(quantity) = self.ledger.read(&event.sku, event.warehouse_id).await? else {
            info!(sku = %event.sku, warehouse_id = %event.warehouse_id, "no stock row for event");
            return Ok(HandlerOutcome::MissingStock);
        };

        if quantity >= self.threshold {
            return Ok(HandlerOutcome::Sufficient { quantity });
        }

        let alert = LowStockAlert::new(event.sku.clone(), event.warehouse_id, quantity, self.threshold);
        match self.notifier.notify_low_stock(&alert).await {
            Ok(()) => {
                info!(sku = %event.sku, warehouse_id = %event.warehouse_id, quantity, "low stock alert sent");
                Ok(HandlerOutcome::Alerted { quantity })
            }
            Err(e) => {
                warn!(
                    sku = %event.sku,
                    warehouse_id = %event.warehouse_id,
                    quantity,
                    error = %e,
                    "low stock alert failed"
                );
                Ok(HandlerOutcome::NotifyFailed { quantity })
            }
        }
    }
}

#[async_trait]
impl<L, N> EventHandler for LowStockHandler<L, N>
where
    L: StockLedger + 'static,
    N: Notifier + 'static,
{
    async fn handle(&self, event: InventoryEvent) {
        match self.check(&event).await {
            Ok(outcome) => debug!(sku = %event.sku, ?outcome, "low stock check done"),
            Err(e) => error!(
                sku = %event.sku,
                warehouse_id = %event.warehouse_id,
                error = %e,
                "low stock check failed; event dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use omnistock_core::{Sku, WarehouseId};

    use crate::ledger::InMemoryStockLedger;
    use crate::notifier::RecordingNotifier;
    use crate::processor::{EventProcessor, ProcessorConfig};

    use super::*;

    fn deduction(sku: &str, warehouse: i64) -> InventoryEvent {
        InventoryEvent::new(sku, WarehouseId::new(warehouse), -1, "web", "order")
    }

    async fn ledger_with(sku: &str, warehouse: i64, quantity: i64) -> InMemoryStockLedger {
        let ledger = InMemoryStockLedger::new();
        ledger
            .upsert_delta(&Sku::from(sku), WarehouseId::new(warehouse), quantity)
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn nine_alerts_and_ten_does_not() {
        let notifier = Arc::new(RecordingNotifier::new());

        let handler = LowStockHandler::new(ledger_with("A", 1, 9).await, notifier.clone());
        assert_eq!(
            handler.check(&deduction("A", 1)).await.unwrap(),
            HandlerOutcome::Alerted { quantity: 9 }
        );

        let handler = LowStockHandler::new(ledger_with("A", 1, 10).await, notifier.clone());
        assert_eq!(
            handler.check(&deduction("A", 1)).await.unwrap(),
            HandlerOutcome::Sufficient { quantity: 10 }
        );

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].stock_quantity, 9);
        assert_eq!(alerts[0].threshold, 10);
        assert_eq!(alerts[0].warehouse_id, WarehouseId::new(1));
    }

    #[tokio::test]
    async fn restocks_never_alert() {
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = LowStockHandler::new(ledger_with("A", 1, 0).await, notifier.clone());

        for change in [0, 5] {
            let event = InventoryEvent::new("A", WarehouseId::new(1), change, "web", "stock_update");
            assert_eq!(handler.check(&event).await.unwrap(), HandlerOutcome::NotADeduction);
        }
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn missing_row_is_not_an_alert() {
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = LowStockHandler::new(InMemoryStockLedger::new(), notifier.clone());

        assert_eq!(
            handler.check(&deduction("GHOST", 4)).await.unwrap(),
            HandlerOutcome::MissingStock
        );
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn notifier_failure_is_tolerated() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let handler = LowStockHandler::new(ledger_with("A", 2, 3).await, notifier.clone());

        assert_eq!(
            handler.check(&deduction("A", 2)).await.unwrap(),
            HandlerOutcome::NotifyFailed { quantity: 3 }
        );
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn runs_behind_the_processor() {
        let notifier = Arc::new(RecordingNotifier::new());
        let ledger = ledger_with("A", 1, 2).await;
        ledger.upsert_delta(&Sku::from("A"), WarehouseId::new(2), 50).await.unwrap();

        let processor = EventProcessor::spawn(
            LowStockHandler::new(ledger, notifier.clone()),
            ProcessorConfig::default(),
        );
        let submitter = processor.submitter();
        submitter.submit(deduction("A", 1)).await.unwrap();
        submitter.submit(deduction("A", 2)).await.unwrap();
        submitter.submit(deduction("B", 1)).await.unwrap();

        let report = processor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.completed, 3);
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sku, Sku::from("A"));
        assert_eq!(alerts[0].warehouse_id, WarehouseId::new(1));
    }
}
