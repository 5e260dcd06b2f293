//! In-memory event log for tests/dev.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::event::{InventoryEvent, LogFields};
use crate::log::{EventLog, EventLogError};
use crate::position::{LogEntry, LogPosition};

/// In-memory append-only log.
///
/// - Positions are `n-0` for the n-th entry (1-based)
/// - Readers park on a `Notify` until something is appended
/// - Not durable: contents vanish with the process
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: Mutex<Vec<LogEntry>>,
    appended: Notify,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw fields, bypassing the typed encoder (used to inject malformed entries).
    pub fn append_fields(&self, fields: LogFields) -> Result<LogPosition, EventLogError> {
        let position = {
            let mut entries = self.entries.lock().map_err(|_| EventLogError::Closed)?;
            let position = LogPosition::new(entries.len() as u64 + 1, 0);
            entries.push(LogEntry::new(position, fields));
            position
        };
        self.appended.notify_waiters();
        Ok(position)
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batch_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError> {
        let entries = self.entries.lock().map_err(|_| EventLogError::Closed)?;
        let start = entries.partition_point(|e| e.position <= after);
        Ok(entries[start..].iter().take(max).cloned().collect())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: &InventoryEvent) -> Result<LogPosition, EventLogError> {
        let fields = event
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.append_fields(fields)
    }

    async fn read_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError> {
        let max = max.max(1);
        loop {
            // Register interest before checking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.batch_after(after, max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            notified.await;
        }
    }

    async fn tail(&self) -> Result<LogPosition, EventLogError> {
        let entries = self.entries.lock().map_err(|_| EventLogError::Closed)?;
        Ok(entries.last().map(|e| e.position).unwrap_or(LogPosition::ZERO))
    }
}
