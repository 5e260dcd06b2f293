//! Durable, append-only event log abstraction.
//!
//! The log is the hand-off point between producers (stock updates, the
//! allocator) and the stream consumer.
//!
//! ## Delivery
//!
//! - **Ordered**: `read_after` returns entries in log order.
//! - **Restartable**: a reader resumes from any [`LogPosition`] it has seen.
//! - **At-least-once** when paired with a checkpoint that is written after
//!   processing: a crash between processing and checkpointing replays the batch.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::InventoryEvent;
use crate::position::{LogEntry, LogPosition};

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log connection error: {0}")]
    Connection(String),

    #[error("event log command error: {0}")]
    Command(String),

    #[error("malformed log response: {0}")]
    Malformed(String),

    #[error("event log closed")]
    Closed,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event; returns the position it was assigned.
    async fn append(&self, event: &InventoryEvent) -> Result<LogPosition, EventLogError>;

    /// Read up to `max` entries strictly after `after`.
    ///
    /// Waits until at least one entry exists; never returns an empty batch on
    /// success. Cancel by dropping the future.
    async fn read_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError>;

    /// Position of the newest entry, or [`LogPosition::ZERO`] for an empty log.
    async fn tail(&self) -> Result<LogPosition, EventLogError>;
}

#[async_trait]
impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    async fn append(&self, event: &InventoryEvent) -> Result<LogPosition, EventLogError> {
        (**self).append(event).await
    }

    async fn read_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError> {
        (**self).read_after(after, max).await
    }

    async fn tail(&self) -> Result<LogPosition, EventLogError> {
        (**self).tail().await
    }
}
