//! Inventory domain module.
//!
//! This crate contains business rules for multi-warehouse stock, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod allocation;
pub mod stock;

pub use allocation::{AllocationLeg, AllocationPlan, Order, Shortfall, allocation_order, plan_allocation};
pub use stock::{
    InventoryTransaction, NewTransaction, StockLevel, StockUpdate, TransactionType, WarehouseStock,
};
