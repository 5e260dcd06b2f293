use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnistock_core::{DomainError, DomainResult, Sku, WarehouseId};

/// Current on-hand quantity for one (SKU, warehouse) pair.
///
/// Quantity never goes negative; the ledger refuses to commit a change that
/// would make it so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

/// A (warehouse, quantity) row as read for one SKU.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

impl WarehouseStock {
    pub fn new(warehouse_id: WarehouseId, quantity: i64) -> Self {
        Self {
            warehouse_id,
            quantity,
        }
    }
}

/// Request to change stock in one warehouse (positive = restock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StockUpdate {
    pub fn new(sku: impl Into<Sku>, warehouse_id: WarehouseId, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            warehouse_id,
            quantity,
            channel: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.is_blank() {
            return Err(DomainError::validation("invalid SKU"));
        }
        if !self.warehouse_id.is_valid() {
            return Err(DomainError::validation("invalid warehouse ID"));
        }
        if self.quantity == 0 {
            return Err(DomainError::validation("invalid quantity"));
        }
        Ok(())
    }
}

/// Kind of audit record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    StockUpdate,
    Order,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::StockUpdate => "stock_update",
            TransactionType::Order => "order",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stock_update" => Ok(TransactionType::StockUpdate),
            "order" => Ok(TransactionType::Order),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// An audit record not yet written (no id assigned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub change: i64,
    pub kind: TransactionType,
    pub channel: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewTransaction {
    pub fn stock_update(update: &StockUpdate) -> Self {
        Self {
            sku: update.sku.clone(),
            warehouse_id: update.warehouse_id,
            change: update.quantity,
            kind: TransactionType::StockUpdate,
            channel: update.channel.clone(),
            timestamp: update.timestamp,
        }
    }

    pub fn order(sku: &Sku, warehouse_id: WarehouseId, deducted: i64, channel: &str) -> Self {
        Self {
            sku: sku.clone(),
            warehouse_id,
            change: -deducted,
            kind: TransactionType::Order,
            channel: Some(channel.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit record of a stock change.
///
/// For any (SKU, warehouse) the sum of `change` over all records equals the
/// current stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: i64,
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub change: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub channel: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InventoryTransaction {
    pub fn from_new(id: i64, record: NewTransaction) -> Self {
        Self {
            id,
            sku: record.sku,
            warehouse_id: record.warehouse_id,
            change: record.change,
            kind: record.kind,
            channel: record.channel,
            timestamp: record.timestamp,
        }
    }
}
