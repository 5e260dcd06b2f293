//! Multi-warehouse order allocation.
//!
//! An allocation runs inside one ledger transaction:
//!
//! 1. lock and read the SKU's positive rows (`read_positive`)
//! 2. plan greedily: largest quantity first, ties on lower warehouse id
//! 3. for each leg deduct and append an `order` audit record
//! 4. commit
//!
//! Any failure before the commit, including a shortfall, leaves the ledger
//! untouched. After the commit one [`InventoryEvent`] per warehouse touched
//! is appended to the event log; a failed append is logged and reported in
//! the [`Allocation`] but does not undo the order.

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use omnistock_core::{DomainError, Sku};
use omnistock_events::{EventLog, InventoryEvent, REASON_ORDER};
use omnistock_inventory::{
    AllocationLeg, InventoryTransaction, NewTransaction, Order, plan_allocation,
};

use crate::ledger::{LedgerError, LedgerTransaction, StockLedger};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: Sku,
        requested: i64,
        available: i64,
    },

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AllocationError {
    /// Whether the caller is at fault (as opposed to the system).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AllocationError::InsufficientStock { .. } | AllocationError::Validation(_)
        )
    }
}

/// A committed allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub legs: Vec<AllocationLeg>,
    pub transactions: Vec<InventoryTransaction>,
    /// Events appended to the log after commit.
    pub events_published: usize,
    /// Events that could not be appended.
    pub events_failed: usize,
}

impl Allocation {
    pub fn warehouses_touched(&self) -> usize {
        self.legs.len()
    }
}

#[derive(Debug, Clone)]
pub struct Allocator<L, G> {
    ledger: L,
    log: G,
}

impl<L, G> Allocator<L, G>
where
    L: StockLedger,
    G: EventLog,
{
    pub fn new(ledger: L, log: G) -> Self {
        Self { ledger, log }
    }

    #[instrument(
        skip(self, order),
        fields(sku = %order.sku, channel = %order.channel, quantity = order.quantity),
        err
    )]
    pub async fn allocate(&self, order: &Order) -> Result<Allocation, AllocationError> {
        order.validate()?;

        let mut tx = self.ledger.begin().await?;
        let rows = tx.read_positive(&order.sku).await?;

        let plan = match plan_allocation(&rows, order.quantity) {
            Ok(plan) => plan,
            Err(shortfall) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback after shortfall failed");
                }
                return Err(AllocationError::InsufficientStock {
                    sku: order.sku.clone(),
                    requested: shortfall.requested,
                    available: shortfall.available,
                });
            }
        };

        // An early return drops `tx`, which rolls everything back.
        let mut transactions = Vec::with_capacity(plan.warehouses_touched());
        for leg in plan.legs() {
            tx.upsert_delta(&order.sku, leg.warehouse_id, -leg.quantity)
                .await?;
            let record = NewTransaction::order(&order.sku, leg.warehouse_id, leg.quantity, &order.channel);
            transactions.push(tx.append_transaction(record).await?);
        }
        tx.commit().await?;

        let legs = plan.into_legs();
        let (events_published, events_failed) = self.publish(order, &legs).await;
        info!(warehouses = legs.len(), "order allocated");

        Ok(Allocation {
            legs,
            transactions,
            events_published,
            events_failed,
        })
    }

    async fn publish(&self, order: &Order, legs: &[AllocationLeg]) -> (usize, usize) {
        let mut published = 0;
        let mut failed = 0;
        for leg in legs {
            let event = InventoryEvent::new(
                order.sku.clone(),
                leg.warehouse_id,
                -leg.quantity,
                order.channel.clone(),
                REASON_ORDER,
            );
            match self.log.append(&event).await {
                Ok(_) => published += 1,
                Err(e) => {
                    error!(
                        sku = %order.sku,
                        warehouse_id = %leg.warehouse_id,
                        error = %e,
                        "failed to publish allocation event"
                    );
                    failed += 1;
                }
            }
        }
        (published, failed)
    }
}
