//! Stock ledger boundary: stock levels plus the append-only transaction log.
//!
//! Stock rows and their audit records are written through the same
//! [`LedgerTransaction`], so a stock change and its audit record commit or
//! roll back together. Dropping a transaction without committing rolls it back.
//!
//! ## Implementation Requirements
//!
//! - `upsert_delta` must refuse any change that leaves a quantity below zero
//!   or outside the `i64` range
//! - `read_positive` must hold the returned rows stable until commit/rollback
//!   (row locks in SQL, an exclusive guard in memory) so concurrent
//!   allocations cannot oversell
//! - `read_positive` returns rows in allocation order: quantity descending,
//!   then warehouse id ascending

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use omnistock_core::{Sku, WarehouseId};
use omnistock_inventory::{InventoryTransaction, NewTransaction, StockLevel, WarehouseStock};

pub use in_memory::{InMemoryLedgerTransaction, InMemoryStockLedger};
pub use postgres::{PgLedgerTransaction, PgStockLedger};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("stock for {sku} in warehouse {warehouse_id} cannot absorb a change of {delta}")]
    NegativeStock {
        sku: Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    },

    /// The resulting quantity does not fit in an `i64`.
    #[error("stock for {sku} in warehouse {warehouse_id} overflows with a change of {delta}")]
    QuantityOverflow {
        sku: Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    },

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// One all-or-nothing unit of work against the ledger.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn read(&mut self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError>;

    /// Rows of `sku` with quantity > 0, in allocation order, held for this transaction.
    async fn read_positive(&mut self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError>;

    /// Create or adjust a row; returns the resulting quantity.
    async fn upsert_delta(
        &mut self,
        sku: &Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    ) -> Result<i64, LedgerError>;

    async fn append_transaction(
        &mut self,
        record: NewTransaction,
    ) -> Result<InventoryTransaction, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Source of truth for stock and its history.
#[async_trait]
pub trait StockLedger: Send + Sync {
    type Tx: LedgerTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    async fn read(&self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError>;

    async fn read_positive(&self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError>;

    /// Every row of `sku` (including zero rows), ordered by warehouse id.
    async fn levels(&self, sku: &Sku) -> Result<Vec<StockLevel>, LedgerError>;

    /// Audit records of `sku`, newest first.
    async fn history(&self, sku: &Sku) -> Result<Vec<InventoryTransaction>, LedgerError>;

    /// Standalone `upsert_delta` in its own transaction (no audit record).
    async fn upsert_delta(
        &self,
        sku: &Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    ) -> Result<i64, LedgerError> {
        let mut tx = self.begin().await?;
        let quantity = tx.upsert_delta(sku, warehouse_id, delta).await?;
        tx.commit().await?;
        Ok(quantity)
    }
}

#[async_trait]
impl<L> StockLedger for std::sync::Arc<L>
where
    L: StockLedger + ?Sized,
{
    type Tx = L::Tx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        (**self).begin().await
    }

    async fn read(&self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError> {
        (**self).read(sku, warehouse_id).await
    }

    async fn read_positive(&self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError> {
        (**self).read_positive(sku).await
    }

    async fn levels(&self, sku: &Sku) -> Result<Vec<StockLevel>, LedgerError> {
        (**self).levels(sku).await
    }

    async fn history(&self, sku: &Sku) -> Result<Vec<InventoryTransaction>, LedgerError> {
        (**self).history(sku).await
    }
}
