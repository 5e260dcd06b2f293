//! Postgres-backed stock ledger.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (check constraint violation) | `23514` | `NegativeStock` | `quantity >= 0` rejected an update |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / Other | N/A | `Storage` | Connection failures, closed pool |
//!
//! ## Locking
//!
//! `read_positive` and `upsert_delta` take `FOR UPDATE` row locks, always in
//! warehouse id order, so two allocations for the same SKU serialize on the
//! rows they share instead of deadlocking.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use async_trait::async_trait;

use omnistock_core::{Sku, WarehouseId};
use omnistock_inventory::{
    InventoryTransaction, NewTransaction, StockLevel, TransactionType, WarehouseStock,
    allocation_order,
};

use super::{LedgerError, LedgerTransaction, StockLedger};

#[derive(Debug, Clone)]
pub struct PgStockLedger {
    pool: PgPool,
}

impl PgStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A live Postgres transaction. Dropping it without `commit` rolls back.
#[derive(Debug)]
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn read(&mut self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT quantity
            FROM stock_levels
            WHERE sku = $1 AND warehouse_id = $2
            FOR UPDATE
            "#,
        )
        .bind(sku.as_str())
        .bind(warehouse_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("read", e))?;

        row.map(|r| r.try_get::<i64, _>("quantity"))
            .transpose()
            .map_err(|e| map_sqlx_error("read", e))
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    async fn read_positive(&mut self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT warehouse_id, quantity
            FROM stock_levels
            WHERE sku = $1 AND quantity > 0
            ORDER BY warehouse_id ASC
            FOR UPDATE
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("read_positive", e))?;

        let mut stock = rows
            .iter()
            .map(warehouse_stock_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("read_positive", e))?;
        allocation_order(&mut stock);
        Ok(stock)
    }

    #[instrument(skip(self), fields(sku = %sku, warehouse_id = %warehouse_id), err)]
    async fn upsert_delta(
        &mut self,
        sku: &Sku,
        warehouse_id: WarehouseId,
        delta: i64,
    ) -> Result<i64, LedgerError> {
        let negative = || LedgerError::NegativeStock {
            sku: sku.clone(),
            warehouse_id,
            delta,
        };

        let overflow = || LedgerError::QuantityOverflow {
            sku: sku.clone(),
            warehouse_id,
            delta,
        };

        let current = self.read(sku, warehouse_id).await?;
        match current.unwrap_or(0).checked_add(delta) {
            None => return Err(overflow()),
            Some(next) if next < 0 => return Err(negative()),
            Some(_) => {}
        }

        let query = match current {
            Some(_) => sqlx::query(
                r#"
                UPDATE stock_levels
                SET quantity = quantity + $3, updated_at = NOW()
                WHERE sku = $1 AND warehouse_id = $2
                RETURNING quantity
                "#,
            ),
            // A concurrent insert of the same row lands in ON CONFLICT.
            None => sqlx::query(
                r#"
                INSERT INTO stock_levels (sku, warehouse_id, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (sku, warehouse_id)
                DO UPDATE SET
                    quantity = stock_levels.quantity + EXCLUDED.quantity,
                    updated_at = NOW()
                RETURNING quantity
                "#,
            ),
        };

        let row = query
            .bind(sku.as_str())
            .bind(warehouse_id.get())
            .bind(delta)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_check_violation(&e) {
                    negative()
                } else if is_out_of_range(&e) {
                    overflow()
                } else {
                    map_sqlx_error("upsert_delta", e)
                }
            })?;

        row.try_get::<i64, _>("quantity")
            .map_err(|e| map_sqlx_error("upsert_delta", e))
    }

    #[instrument(skip(self, record), fields(sku = %record.sku, kind = %record.kind), err)]
    async fn append_transaction(
        &mut self,
        record: NewTransaction,
    ) -> Result<InventoryTransaction, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventory_transactions (sku, warehouse_id, change, type, channel, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(record.sku.as_str())
        .bind(record.warehouse_id.get())
        .bind(record.change)
        .bind(record.kind.as_str())
        .bind(record.channel.as_deref())
        .bind(record.timestamp)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("append_transaction", e))?;
        Ok(InventoryTransaction::from_new(id, record))
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    type Tx = PgLedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgLedgerTransaction { tx })
    }

    async fn read(&self, sku: &Sku, warehouse_id: WarehouseId) -> Result<Option<i64>, LedgerError> {
        let row = sqlx::query("SELECT quantity FROM stock_levels WHERE sku = $1 AND warehouse_id = $2")
            .bind(sku.as_str())
            .bind(warehouse_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("read", e))?;

        row.map(|r| r.try_get::<i64, _>("quantity"))
            .transpose()
            .map_err(|e| map_sqlx_error("read", e))
    }

    async fn read_positive(&self, sku: &Sku) -> Result<Vec<WarehouseStock>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT warehouse_id, quantity
            FROM stock_levels
            WHERE sku = $1 AND quantity > 0
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_positive", e))?;

        let mut stock = rows
            .iter()
            .map(warehouse_stock_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("read_positive", e))?;
        allocation_order(&mut stock);
        Ok(stock)
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    async fn levels(&self, sku: &Sku) -> Result<Vec<StockLevel>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT warehouse_id, quantity
            FROM stock_levels
            WHERE sku = $1
            ORDER BY warehouse_id ASC
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("levels", e))?;

        rows.iter()
            .map(|row| {
                warehouse_stock_from_row(row).map(|ws| StockLevel {
                    sku: sku.clone(),
                    warehouse_id: ws.warehouse_id,
                    quantity: ws.quantity,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("levels", e))
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    async fn history(&self, sku: &Sku) -> Result<Vec<InventoryTransaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sku, warehouse_id, change, type, channel, timestamp
            FROM inventory_transactions
            WHERE sku = $1
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row = <TransactionRow as sqlx::FromRow<_>>::from_row(&row)
                .map_err(|e| LedgerError::Storage(format!("failed to read transaction row: {e}")))?;
            out.push(InventoryTransaction::try_from(row)?);
        }
        Ok(out)
    }
}

fn warehouse_stock_from_row(row: &sqlx::postgres::PgRow) -> Result<WarehouseStock, sqlx::Error> {
    Ok(WarehouseStock::new(
        WarehouseId::new(row.try_get("warehouse_id")?),
        row.try_get("quantity")?,
    ))
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23514"))
}

fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("22003"))
}

/// Map SQLx errors into [`LedgerError::Storage`] with the failing operation attached.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            LedgerError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: i64,
    sku: String,
    warehouse_id: i64,
    change: i64,
    kind: String,
    channel: Option<String>,
    timestamp: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TransactionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            warehouse_id: row.try_get("warehouse_id")?,
            change: row.try_get("change")?,
            kind: row.try_get("type")?,
            channel: row.try_get("channel")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl TryFrom<TransactionRow> for InventoryTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind: TransactionType = row
            .kind
            .parse()
            .map_err(|e| LedgerError::Storage(format!("transaction {}: {e}", row.id)))?;
        Ok(InventoryTransaction {
            id: row.id,
            sku: Sku::new(row.sku),
            warehouse_id: WarehouseId::new(row.warehouse_id),
            change: row.change,
            kind,
            channel: row.channel,
            timestamp: row.timestamp,
        })
    }
}
