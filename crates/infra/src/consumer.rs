//! Stream consumer: durable log → event processor.
//!
//! Reads the log in batches strictly after its cursor, decodes each entry,
//! forwards the events in log order and then persists the batch's last
//! position as the checkpoint.
//!
//! ## Delivery
//!
//! - **At-least-once**: the checkpoint is written after a batch is forwarded, so a
//!   crash in between replays that batch on restart.
//! - **Never below the checkpoint**: a restarted consumer reads strictly after it.
//! - **First run**: with no checkpoint the consumer starts strictly after the
//!   log tail as it is when the consumer first reads.
//! - **Never gives up**: read failures are retried after a fixed backoff.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use omnistock_events::{
    DecodePolicy, EventLog, EventLogError, InventoryEvent, LogEntry, LogPosition,
};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::processor::{EventSubmitter, ProcessorError};

pub const DEFAULT_CONSUMER_NAME: &str = "low-stock-detector";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Checkpoint owner name.
    pub name: String,
    pub batch_size: usize,
    pub retry_backoff: Duration,
    pub decode_policy: DecodePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONSUMER_NAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// One decoded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub events: Vec<InventoryEvent>,
    /// Position of the last entry read, decoded or not.
    pub last: LogPosition,
    /// Entries rejected by strict decoding.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct StreamConsumer<L, C> {
    log: L,
    checkpoints: C,
    config: ConsumerConfig,
    cursor: Option<LogPosition>,
    committed: Option<LogPosition>,
}

impl<L, C> StreamConsumer<L, C>
where
    L: EventLog,
    C: CheckpointStore,
{
    pub fn new(log: L, checkpoints: C, config: ConsumerConfig) -> Self {
        Self {
            log,
            checkpoints,
            config,
            cursor: None,
            committed: None,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Last position read (not necessarily checkpointed).
    pub fn cursor(&self) -> Option<LogPosition> {
        self.cursor
    }

    /// Last position this consumer checkpointed.
    pub fn committed(&self) -> Option<LogPosition> {
        self.committed
    }

    /// Wait for the next batch after the cursor and decode it.
    ///
    /// Retries forever on failure; cancel by dropping the future.
    pub async fn next_batch(&mut self) -> Batch {
        let after = self.start_position().await;
        loop {
            match self.log.read_after(after, self.config.batch_size).await {
                Ok(entries) if !entries.is_empty() => {
                    let batch = self.decode_batch(entries);
                    self.cursor = Some(batch.last);
                    return batch;
                }
                Ok(_) => {
                    debug!(consumer = %self.config.name, "empty read; backing off");
                }
                Err(e) => {
                    warn!(
                        consumer = %self.config.name,
                        error = %e,
                        backoff_ms = self.config.retry_backoff.as_millis() as u64,
                        "event log read failed; retrying"
                    );
                }
            }
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }

    /// Persist `position` as fully forwarded.
    pub async fn commit(&mut self, position: LogPosition) -> Result<(), CheckpointError> {
        self.checkpoints.save(&self.config.name, position).await?;
        self.committed = Some(position);
        debug!(consumer = %self.config.name, %position, "checkpoint saved");
        Ok(())
    }

    /// Forward batches into `submitter` until `shutdown` flips to `true`.
    ///
    /// Returns an error only when the processor stops accepting events. A
    /// failed checkpoint write is logged; the next batch's write supersedes it.
    pub async fn run(
        mut self,
        submitter: EventSubmitter,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError> {
        info!(consumer = %self.config.name, "stream consumer started");
        loop {
            let batch = tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                batch = self.next_batch() => batch,
            };

            for event in batch.events {
                tokio::select! {
                    _ = stop_requested(&mut shutdown) => {
                        info!(consumer = %self.config.name, "stopped mid-batch; batch will be redelivered");
                        return Ok(());
                    }
                    sent = submitter.submit(event) => sent?,
                }
            }

            if let Err(e) = self.commit(batch.last).await {
                error!(consumer = %self.config.name, position = %batch.last, error = %e, "checkpoint save failed");
            }
        }
        info!(consumer = %self.config.name, committed = ?self.committed, "stream consumer stopped");
        Ok(())
    }

    /// Lazy, infinite sequence of events.
    ///
    /// A batch is checkpointed once every event in it has been pulled and the
    /// next one is requested.
    pub fn into_stream(self) -> impl Stream<Item = InventoryEvent> + Send
    where
        L: 'static,
        C: 'static,
    {
        let state = (self, VecDeque::new(), None::<LogPosition>);
        stream::unfold(state, |(mut consumer, mut buffered, mut pending)| async move {
            loop {
                if let Some(event) = buffered.pop_front() {
                    return Some((event, (consumer, buffered, pending)));
                }
                if let Some(position) = pending.take() {
                    if let Err(e) = consumer.commit(position).await {
                        error!(consumer = %consumer.config.name, %position, error = %e, "checkpoint save failed");
                    }
                }
                let batch = consumer.next_batch().await;
                pending = Some(batch.last);
                buffered.extend(batch.events);
            }
        })
    }

    async fn start_position(&mut self) -> LogPosition {
        if let Some(position) = self.cursor {
            return position;
        }
        loop {
            match self.resolve_start().await {
                Ok(position) => {
                    self.cursor = Some(position);
                    return position;
                }
                Err(e) => {
                    warn!(consumer = %self.config.name, error = %e, "could not resolve start position; retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    async fn resolve_start(&self) -> Result<LogPosition, ConsumerError> {
        if let Some(position) = self.checkpoints.load(&self.config.name).await? {
            info!(consumer = %self.config.name, %position, "resuming from checkpoint");
            return Ok(position);
        }
        let tail = self.log.tail().await?;
        info!(consumer = %self.config.name, %tail, "no checkpoint; starting after log tail");
        Ok(tail)
    }

    fn decode_batch(&self, entries: Vec<LogEntry>) -> Batch {
        let mut batch = Batch {
            events: Vec::with_capacity(entries.len()),
            last: LogPosition::ZERO,
            skipped: 0,
        };
        for entry in entries {
            batch.last = entry.position;
            match InventoryEvent::decode(&entry.fields, self.config.decode_policy) {
                Ok(event) => batch.events.push(event),
                Err(e) => {
                    error!(
                        consumer = %self.config.name,
                        position = %entry.position,
                        error = %e,
                        "skipping malformed event"
                    );
                    batch.skipped += 1;
                }
            }
        }
        batch
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::StreamExt;
    use omnistock_core::WarehouseId;
    use omnistock_events::{InMemoryEventLog, LogFields};

    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::processor::{EventHandler, EventProcessor, ProcessorConfig};

    use super::*;

    fn event(change: i64) -> InventoryEvent {
        InventoryEvent::new("SKU-1", WarehouseId::new(1), change, "web", "order")
    }

    fn fields(pairs: &[(&str, &str)]) -> LogFields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn consumer(
        log: &Arc<InMemoryEventLog>,
        store: &Arc<InMemoryCheckpointStore>,
    ) -> StreamConsumer<Arc<InMemoryEventLog>, Arc<InMemoryCheckpointStore>> {
        StreamConsumer::new(log.clone(), store.clone(), ConsumerConfig::default())
    }

    #[tokio::test]
    async fn resumes_strictly_after_checkpoint() {
        let log = Arc::new(InMemoryEventLog::new());
        let mut positions = Vec::new();
        for n in 1..=5 {
            positions.push(log.append(&event(-n)).await.unwrap());
        }
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, positions[2]).await.unwrap();

        let batch = consumer(&log, &store).next_batch().await;
        let changes: Vec<_> = batch.events.iter().map(|e| e.change).collect();
        assert_eq!(changes, vec![-4, -5]);
        assert_eq!(batch.last, positions[4]);
    }

    #[tokio::test]
    async fn first_run_starts_after_tail() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append(&event(-1)).await.unwrap();
        log.append(&event(-2)).await.unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());

        let mut consumer = consumer(&log, &store);
        let reader = tokio::spawn(async move { consumer.next_batch().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished(), "existing entries must not be delivered");

        log.append(&event(-3)).await.unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("new entry wakes the reader")
            .unwrap();
        assert_eq!(batch.events, vec![event(-3)]);
    }

    #[tokio::test]
    async fn batches_are_capped_and_sequential() {
        let log = Arc::new(InMemoryEventLog::new());
        for n in 1..=25 {
            log.append(&event(-n)).await.unwrap();
        }
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();

        let mut consumer = consumer(&log, &store);
        let sizes = [
            consumer.next_batch().await.events.len(),
            consumer.next_batch().await.events.len(),
            consumer.next_batch().await.events.len(),
        ];
        assert_eq!(sizes, [10, 10, 5]);
        assert_eq!(consumer.cursor(), Some(LogPosition::new(25, 0)));
    }

    #[tokio::test]
    async fn lenient_decoding_coerces_to_zero() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append_fields(fields(&[
            ("sku", "SKU-7"),
            ("warehouse_id", "12x"),
            ("change", "abc"),
            ("channel", "web"),
            ("reason", "order"),
        ]))
        .unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();

        let batch = consumer(&log, &store).next_batch().await;
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.events[0].warehouse_id, WarehouseId::new(12));
        assert_eq!(batch.events[0].change, 0);
    }

    #[tokio::test]
    async fn strict_decoding_skips_but_advances() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append_fields(fields(&[("sku", "SKU-7"), ("change", "oops")])).unwrap();
        let good = log.append(&event(-2)).await.unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();

        let config = ConsumerConfig {
            decode_policy: DecodePolicy::Strict,
            ..ConsumerConfig::default()
        };
        let mut consumer = StreamConsumer::new(log.clone(), store.clone(), config);
        let batch = consumer.next_batch().await;
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.events, vec![event(-2)]);
        assert_eq!(batch.last, good);
    }

    /// Fails the first `failures` reads.
    struct FlakyLog {
        inner: InMemoryEventLog,
        failures: AtomicUsize,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn append(&self, event: &InventoryEvent) -> Result<LogPosition, EventLogError> {
            self.inner.append(event).await
        }

        async fn read_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(EventLogError::Connection("connection refused".into()));
            }
            self.inner.read_after(after, max).await
        }

        async fn tail(&self) -> Result<LogPosition, EventLogError> {
            self.inner.tail().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_back_off_and_retry() {
        let log = Arc::new(FlakyLog {
            inner: InMemoryEventLog::new(),
            failures: AtomicUsize::new(2),
            reads: AtomicUsize::new(0),
        });
        log.append(&event(-1)).await.unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();

        let started = tokio::time::Instant::now();
        let mut consumer = StreamConsumer::new(log.clone(), store, ConsumerConfig::default());
        let batch = consumer.next_batch().await;

        assert_eq!(batch.events.len(), 1);
        assert_eq!(log.reads.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[derive(Default)]
    struct Collect {
        seen: std::sync::Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: InventoryEvent) {
            self.seen.lock().unwrap().push(event.change);
        }
    }

    #[tokio::test]
    async fn run_forwards_and_checkpoints() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();
        let mut last = LogPosition::ZERO;
        for n in 1..=12 {
            last = log.append(&event(-n)).await.unwrap();
        }

        let handler = Arc::new(Collect::default());
        let processor = EventProcessor::spawn(handler.clone(), ProcessorConfig::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(consumer(&log, &store).run(processor.submitter(), stop_rx));

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.load(DEFAULT_CONSUMER_NAME).await.unwrap() != Some(last) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("checkpoint reaches the last entry");

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        processor.shutdown(Duration::from_secs(1)).await.unwrap();

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (-12..=-1).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn restart_does_not_redeliver_checkpointed_entries() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();
        for n in 1..=3 {
            log.append(&event(-n)).await.unwrap();
        }

        let mut first = consumer(&log, &store);
        let batch = first.next_batch().await;
        first.commit(batch.last).await.unwrap();
        drop(first);

        log.append(&event(-4)).await.unwrap();
        let batch = consumer(&log, &store).next_batch().await;
        assert_eq!(batch.events, vec![event(-4)]);
    }

    #[tokio::test]
    async fn stream_commits_after_batch_is_pulled() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.save(DEFAULT_CONSUMER_NAME, LogPosition::ZERO).await.unwrap();
        let mut positions = Vec::new();
        for n in 1..=3 {
            positions.push(log.append(&event(-n)).await.unwrap());
        }

        let config = ConsumerConfig {
            batch_size: 2,
            ..ConsumerConfig::default()
        };
        let events: Vec<_> = StreamConsumer::new(log.clone(), store.clone(), config)
            .into_stream()
            .take(3)
            .collect()
            .await;

        assert_eq!(events, vec![event(-1), event(-2), event(-3)]);
        assert_eq!(store.load(DEFAULT_CONSUMER_NAME).await.unwrap(), Some(positions[1]));
    }
}
