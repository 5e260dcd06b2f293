//! Inventory events and the durable event log abstraction.
//!
//! Producers append [`InventoryEvent`]s to an [`EventLog`]; consumers read
//! raw [`LogEntry`]s back from a [`LogPosition`] and decode them.

pub mod event;
pub mod in_memory_log;
pub mod log;
pub mod position;

pub use event::{
    DecodeError, DecodePolicy, InventoryEvent, LogFields, REASON_ORDER, REASON_STOCK_UPDATE,
};
pub use in_memory_log::InMemoryEventLog;
pub use log::{EventLog, EventLogError};
pub use position::{LogEntry, LogPosition, PositionParseError};
