//! In-memory stock ledger for tests/dev.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use omnistock_core::{Sku, WarehouseId};
use omnistock_inventory::{
    InventoryTransaction, NewTransaction, StockLevel, WarehouseStock, allocation_order,
};

use super::{LedgerError, LedgerTransaction, StockLedger};

#[derive(Debug, Default)]
struct LedgerState {
    stock: BTreeMap<(Sku, WarehouseId), i64>,
    transactions: Vec<InventoryTransaction>,
    next_id: i64,
}

impl LedgerState {
    fn positive(&self, sku: &Sku) -> Vec<WarehouseStock> {
        let mut rows: Vec<_> = self
            .stock
            .iter()
            .filter(|((s, _), qty)| s == sku && **qty > 0)
            .map(|((_, wh), qty)| WarehouseStock::new(*wh, *qty))
            .collect();
        allocation_order(&mut rows);
        rows
    }
}

/// Undo record, replayed in reverse on rollback.
#[derive(Debug)]
enum Undo {
    Stock {
        key: (Sku, WarehouseId),
        previous: Option<i64>,
    },
    Transaction,
}

/// In-memory ledger.
///
/// A transaction holds the whole ledger exclusively from `begin` until it
/// commits, rolls back or is dropped, so every transaction is serialized.
/// Not optimized for throughput.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All audit records in insertion order.
    pub async fn transactions(&self) -> Vec<InventoryTransaction> {
        self.state.lock().await.transactions.clone()
    }

    /// Sum of audit `change` values for one (SKU, warehouse).
    pub async fn replayed_quantity(&self, sku: &Sku, warehouse_id: WarehouseId) -> i64 {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| &t.sku == sku && t.warehouse_id == warehouse_id)
            .map(|t| t.change)
            .sum()
    }
}

/// Transaction over [`InMemoryStockLedger`]; rolls back on drop unless committed.
#[derive(Debug)]
pub struct InMemoryLedgerTransaction {
    guard: Option<OwnedMutexGuard<LedgerState>>,
    undo: Vec<Undo>,
}

impl InMemoryLedgerTransaction {
    fn state(&mut self) -> Result<&mut LedgerState, LedgerError> {
        self.guard
            .as_deref_mut()
            .ok_or_else(|| LedgerError::Storage("transaction already finished".to_string()))
    }

    fn undo_all(&mut self) {
        let Some(state) = self.guard.as_deref_mut() else {
            return;
        };
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Stock { key, previous } => match previous {
                    Some(qty) => {
                        state.stock.insert(key, qty);
                    }
                    None => {
                        state.stock.remove(&key);
                    }
                },
                Undo::Transaction => {
                    state.transactions.pop();
                }
            }
        }
    }
}

impl Drop for InMemoryLedgerTransaction {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn read(&mut self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError> {
        let state = self.state()?;
        Ok(state.stock.get(&(sku.clone(), warehouse_id)).copied())
    }

    async fn read_positive(&mut self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError> {
        Ok(self.state()?.positive(sku))
    }

    async fn upsert_delta(
        &mut self,
        sku: &Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    ) -> Result<i64, LedgerError> {
        let key = (sku.clone(), warehouse_id);
        let state = self.state()?;
        let previous = state.stock.get(&key).copied();
        let Some(next) = previous.unwrap_or(0).checked_add(delta) else {
            return Err(LedgerError::QuantityOverflow {
                sku: sku.clone(),
                warehouse_id,
                delta,
            });
        };
        if next < 0 {
            return Err(LedgerError::NegativeStock {
                sku: sku.clone(),
                warehouse_id,
                delta,
            });
        }
        state.stock.insert(key.clone(), next);
        self.undo.push(Undo::Stock { key, previous });
        Ok(next)
    }

    async fn append_transaction(
        &mut self,
        record: NewTransaction,
    ) -> Result<InventoryTransaction, LedgerError> {
        let state = self.state()?;
        state.next_id += 1;
        let stored = InventoryTransaction::from_new(state.next_id, record);
        state.transactions.push(stored.clone());
        self.undo.push(Undo::Transaction);
        Ok(stored)
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        self.undo.clear();
        self.guard.take();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), LedgerError> {
        self.undo_all();
        self.guard.take();
        Ok(())
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    type Tx = InMemoryLedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(InMemoryLedgerTransaction {
            guard: Some(guard),
            undo: Vec::new(),
        })
    }

    async fn read(&self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.stock.get(&(sku.clone(), warehouse_id)).copied())
    }

    async fn read_positive(&self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError> {
        Ok(self.state.lock().await.positive(sku))
    }

    async fn levels(&self, sku: &Sku) -> Result<Vec<StockLevel>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .stock
            .iter()
            .filter(|((s, _), _)| s == sku)
            .map(|((s, wh), qty)| StockLevel {
                sku: s.clone(),
                warehouse_id: *wh,
                quantity: *qty,
            })
            .collect())
    }

    async fn history(&self, sku: &Sku) -> Result<Vec<InventoryTransaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| &t.sku == sku)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sku() -> Sku {
        Sku::from("SKU-1")
    }

    fn wh(id: i64) -> WarehouseId {
        WarehouseId::new(id)
    }

    #[tokio::test]
    async fn committed_changes_are_visible() {
        let ledger = InMemoryStockLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        assert_eq!(tx.upsert_delta(&sku(), wh(1), 5).await.unwrap(), 5);
        assert_eq!(tx.upsert_delta(&sku(), wh(1), 2).await.unwrap(), 7);
        tx.commit().await.unwrap();

        assert_eq!(ledger.read(&sku(), wh(1)).await.unwrap(), Some(7));
        assert_eq!(ledger.read(&sku(), wh(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let ledger = InMemoryStockLedger::new();
        ledger.upsert_delta(&sku(), wh(1), 5).await.unwrap();

        {
            let mut tx = ledger.begin().await.unwrap();
            tx.upsert_delta(&sku(), wh(1), -3).await.unwrap();
            tx.upsert_delta(&sku(), wh(2), 9).await.unwrap();
            tx.append_transaction(NewTransaction::order(&sku(), wh(1), 3, "web"))
                .await
                .unwrap();
        }

        assert_eq!(ledger.read(&sku(), wh(1)).await.unwrap(), Some(5));
        assert_eq!(ledger.read(&sku(), wh(2)).await.unwrap(), None);
        assert!(ledger.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_rollback_restores_state() {
        let ledger = InMemoryStockLedger::new();
        ledger.upsert_delta(&sku(), wh(1), 4).await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        tx.upsert_delta(&sku(), wh(1), -4).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(ledger.read(&sku(), wh(1)).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn refuses_to_go_negative() {
        let ledger = InMemoryStockLedger::new();
        ledger.upsert_delta(&sku(), wh(1), 2).await.unwrap();

        let err = ledger.upsert_delta(&sku(), wh(1), -3).await.unwrap_err();
        assert!(matches!(err, LedgerError::NegativeStock { delta: -3, .. }));
        assert_eq!(ledger.read(&sku(), wh(1)).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn refuses_to_overflow() {
        let ledger = InMemoryStockLedger::new();
        ledger.upsert_delta(&sku(), wh(1), i64::MAX).await.unwrap();

        let err = ledger.upsert_delta(&sku(), wh(1), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::QuantityOverflow { delta: 1, .. }));
        assert_eq!(ledger.read(&sku(), wh(1)).await.unwrap(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn positive_rows_are_in_allocation_order() {
        let ledger = InMemoryStockLedger::new();
        ledger.upsert_delta(&sku(), wh(1), 3).await.unwrap();
        ledger.upsert_delta(&sku(), wh(2), 8).await.unwrap();
        ledger.upsert_delta(&sku(), wh(3), 3).await.unwrap();
        ledger.upsert_delta(&sku(), wh(4), 1).await.unwrap();
        ledger.upsert_delta(&sku(), wh(4), -1).await.unwrap();
        ledger.upsert_delta(&Sku::from("OTHER"), wh(1), 50).await.unwrap();

        let rows = ledger.read_positive(&sku()).await.unwrap();
        let order: Vec<_> = rows.iter().map(|r| (r.warehouse_id.get(), r.quantity)).collect();
        assert_eq!(order, vec![(2, 8), (1, 3), (3, 3)]);

        // Zero rows still show up in the consolidated view.
        let levels = ledger.levels(&sku()).await.unwrap();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[3].quantity, 0);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let ledger = InMemoryStockLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        for n in 1..=3 {
            tx.append_transaction(NewTransaction::order(&sku(), wh(1), n, "web"))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let ids: Vec<_> = ledger.history(&sku()).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a run of positive deltas leaves the sum of the deltas.
        #[test]
        fn positive_deltas_accumulate(deltas in prop::collection::vec(1i64..1_000, 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let total = rt.block_on(async {
                let ledger = InMemoryStockLedger::new();
                for d in &deltas {
                    ledger.upsert_delta(&sku(), wh(7), *d).await.unwrap();
                }
                ledger.read(&sku(), wh(7)).await.unwrap()
            });
            prop_assert_eq!(total, Some(deltas.iter().sum::<i64>()));
        }
    }
}
