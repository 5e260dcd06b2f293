//! Inventory application service: the operations an outer API exposes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, instrument};

use omnistock_core::{DomainError, Sku};
use omnistock_events::{EventLog, InventoryEvent, REASON_STOCK_UPDATE};
use omnistock_inventory::{InventoryTransaction, NewTransaction, Order, StockLevel, StockUpdate};

use crate::allocator::{Allocation, AllocationError, Allocator};
use crate::ledger::{LedgerError, LedgerTransaction, StockLedger};

/// Channel recorded on stock-update events that do not name one.
pub const DEFAULT_UPDATE_CHANNEL: &str = "manual";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl ServiceError {
    /// Whether the caller is at fault (as opposed to the system).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServiceError::Validation(_) => true,
            ServiceError::Ledger(e) => matches!(
                e,
                LedgerError::NegativeStock { .. } | LedgerError::QuantityOverflow { .. }
            ),
            ServiceError::Allocation(e) => e.is_client_error(),
        }
    }
}

/// Every warehouse row of one SKU plus their sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedStock {
    pub sku: Sku,
    pub warehouses: Vec<StockLevel>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockUpdateReceipt {
    pub level: StockLevel,
    pub transaction: InventoryTransaction,
    pub event_published: bool,
}

#[derive(Debug, Clone)]
pub struct InventoryService<L, G> {
    ledger: L,
    log: G,
    allocator: Allocator<L, G>,
}

impl<L, G> InventoryService<L, G>
where
    L: StockLedger + Clone,
    G: EventLog + Clone,
{
    pub fn new(ledger: L, log: G) -> Self {
        Self {
            allocator: Allocator::new(ledger.clone(), log.clone()),
            ledger,
            log,
        }
    }

    /// Apply a stock delta and its audit record atomically, then announce it.
    #[instrument(
        skip(self, update),
        fields(sku = %update.sku, warehouse_id = %update.warehouse_id, quantity = update.quantity),
        err
    )]
    pub async fn add_or_update_stock(
        &self,
        update: StockUpdate,
    ) -> Result<StockUpdateReceipt, ServiceError> {
        update.validate()?;

        let mut tx = self.ledger.begin().await?;
        let quantity = tx
            .upsert_delta(&update.sku, update.warehouse_id, update.quantity)
            .await?;
        let transaction = tx
            .append_transaction(NewTransaction::stock_update(&update))
            .await?;
        tx.commit().await?;

        let channel = update
            .channel
            .clone()
            .unwrap_or_else(|| DEFAULT_UPDATE_CHANNEL.to_string());
        let event = InventoryEvent::new(
            update.sku.clone(),
            update.warehouse_id,
            update.quantity,
            channel,
            REASON_STOCK_UPDATE,
        );
        let event_published = match self.log.append(&event).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "failed to publish stock update event");
                false
            }
        };

        Ok(StockUpdateReceipt {
            level: StockLevel {
                sku: update.sku,
                warehouse_id: update.warehouse_id,
                quantity,
            },
            transaction,
            event_published,
        })
    }

    pub async fn consolidated_stock(&self, sku: &Sku) -> Result<ConsolidatedStock, ServiceError> {
        let warehouses = self.ledger.levels(sku).await?;
        let total = warehouses
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.quantity));
        Ok(ConsolidatedStock {
            sku: sku.clone(),
            warehouses,
            total,
        })
    }

    pub async fn simulate_order(&self, order: &Order) -> Result<Allocation, ServiceError> {
        Ok(self.allocator.allocate(order).await?)
    }

    /// Audit records for `sku`, newest first.
    pub async fn history(&self, sku: &Sku) -> Result<Vec<InventoryTransaction>, ServiceError> {
        Ok(self.ledger.history(sku).await?)
    }
}
