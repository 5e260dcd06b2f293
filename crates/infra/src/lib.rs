//! Infrastructure layer: ledger, event log, checkpoints, the event pipeline
//! and the services built on them.

pub mod allocator;
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod db;
pub mod event_log;
pub mod ledger;
pub mod notifier;
pub mod processor;
pub mod service;

pub use allocator::{Allocation, AllocationError, Allocator};
pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore};
pub use config::{AppConfig, ConfigError};
pub use consumer::{Batch, ConsumerConfig, ConsumerError, StreamConsumer};
pub use ledger::{InMemoryStockLedger, LedgerError, LedgerTransaction, PgStockLedger, StockLedger};
pub use notifier::{LowStockAlert, Notifier, NotifyError, RecordingNotifier, SlackNotifier, TracingNotifier};
pub use processor::{
    DrainReport, EventHandler, EventProcessor, EventSubmitter, HandlerOutcome, LowStockHandler,
    ProcessorConfig, ProcessorError, ProcessorHandle,
};
pub use service::{ConsolidatedStock, InventoryService, ServiceError, StockUpdateReceipt};
