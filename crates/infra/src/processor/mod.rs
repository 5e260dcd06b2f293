//! In-process event dispatch.
//!
//! [`EventProcessor`] owns a bounded inbound queue and a dispatch task that
//! hands each event to an [`EventHandler`] on its own tokio task, with at most
//! `max_in_flight` handlers running at once.
//!
//! ## Guarantees
//!
//! - **Backpressure**: `submit` waits while the queue is full; events are never dropped
//!   while the processor is running.
//! - **FIFO intake**: events leave the queue in submission order.
//! - **No completion order**: handlers run concurrently and may finish in any order.
//! - **Bounded drain**: [`ProcessorHandle::shutdown`] closes intake, dispatches what
//!   is already queued, and waits for in-flight handlers until the deadline; whatever
//!   is left after that is aborted and counted in the [`DrainReport`].

pub mod low_stock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use omnistock_events::InventoryEvent;

pub use low_stock::{HandlerOutcome, LowStockHandler};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("event processor is closed")]
    Closed,

    #[error("dispatch task failed: {0}")]
    Join(String),
}

/// Reacts to one event. Failures are the handler's to log; nothing is retried.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: InventoryEvent);
}

#[async_trait]
impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    async fn handle(&self, event: InventoryEvent) {
        (**self).handle(event).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub queue_capacity: usize,
    pub max_in_flight: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// What happened to the work that was outstanding at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handlers that ran to completion (over the processor's whole life).
    pub completed: u64,
    /// Handlers that panicked.
    pub panicked: u64,
    /// Handlers still running at the deadline, then aborted.
    pub aborted: u64,
    /// Queued events never dispatched because the deadline passed first.
    pub undispatched: u64,
}

impl DrainReport {
    fn record(&mut self, done: Result<(), JoinError>) {
        match done {
            Ok(()) => self.completed += 1,
            Err(e) if e.is_panic() => {
                warn!(error = %e, "event handler panicked");
                self.panicked += 1;
            }
            Err(_) => self.aborted += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.panicked == 0 && self.aborted == 0 && self.undispatched == 0
    }
}

/// Cloneable intake side of the processor.
#[derive(Debug, Clone)]
pub struct EventSubmitter {
    tx: mpsc::Sender<InventoryEvent>,
}

impl EventSubmitter {
    /// Enqueue `event`, waiting for space when the queue is full.
    pub async fn submit(&self, event: InventoryEvent) -> Result<(), ProcessorError> {
        self.tx.send(event).await.map_err(|_| ProcessorError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to control and join a running processor.
#[derive(Debug)]
pub struct ProcessorHandle {
    submitter: EventSubmitter,
    stop: watch::Sender<Option<Instant>>,
    join: JoinHandle<DrainReport>,
}

impl ProcessorHandle {
    pub fn submitter(&self) -> EventSubmitter {
        self.submitter.clone()
    }

    /// Stop intake and drain, giving outstanding work at most `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<DrainReport, ProcessorError> {
        let _ = self.stop.send(Some(Instant::now() + timeout));
        drop(self.submitter);
        self.join
            .await
            .map_err(|e| ProcessorError::Join(e.to_string()))
    }
}

#[derive(Debug)]
pub struct EventProcessor;

impl EventProcessor {
    /// Start the dispatch task on the current runtime.
    pub fn spawn<H>(handler: H, config: ProcessorConfig) -> ProcessorHandle
    where
        H: EventHandler,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(None);
        let dispatcher = Dispatcher {
            handler: Arc::new(handler),
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            workers: JoinSet::new(),
            report: DrainReport::default(),
        };

        let join = tokio::spawn(dispatcher.run(rx, stop_rx));

        ProcessorHandle {
            submitter: EventSubmitter { tx },
            stop: stop_tx,
            join,
        }
    }
}

struct Dispatcher<H> {
    handler: Arc<H>,
    permits: Arc<Semaphore>,
    workers: JoinSet<()>,
    report: DrainReport,
}

impl<H: EventHandler> Dispatcher<H> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<InventoryEvent>,
        mut stop: watch::Receiver<Option<Instant>>,
    ) -> DrainReport {
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                Some(done) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.report.record(done);
                }
                permit = self.permits.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    tokio::select! {
                        biased;
                        _ = stop.changed() => break,
                        next = rx.recv() => match next {
                            Some(event) => self.dispatch(event, permit),
                            None => break,
                        },
                    }
                }
            }
        }

        // A dropped handle leaves `None`: drain without a deadline.
        let deadline = *stop.borrow();
        rx.close();
        info!(buffered = rx.len(), in_flight = self.workers.len(), "event processor draining");

        let finished = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.drain(&mut rx))
                .await
                .is_ok(),
            None => {
                self.drain(&mut rx).await;
                true
            }
        };

        if !finished {
            while rx.try_recv().is_ok() {
                self.report.undispatched += 1;
            }
            self.workers.abort_all();
            while let Some(done) = self.workers.join_next().await {
                self.report.record(done);
            }
            warn!(
                aborted = self.report.aborted,
                undispatched = self.report.undispatched,
                "event processor drain deadline passed"
            );
        }

        info!(
            completed = self.report.completed,
            panicked = self.report.panicked,
            aborted = self.report.aborted,
            undispatched = self.report.undispatched,
            "event processor stopped"
        );
        self.report
    }

    async fn drain(&mut self, rx: &mut mpsc::Receiver<InventoryEvent>) {
        // Permit first, so an event is only taken off the queue once it can run.
        loop {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let Some(event) = rx.recv().await else {
                break;
            };
            self.dispatch(event, permit);
        }
        while let Some(done) = self.workers.join_next().await {
            self.report.record(done);
        }
    }

    fn dispatch(&mut self, event: InventoryEvent, permit: tokio::sync::OwnedSemaphorePermit) {
        debug!(sku = %event.sku, warehouse_id = %event.warehouse_id, change = event.change, "dispatching event");
        let handler = self.handler.clone();
        self.workers.spawn(async move {
            handler.handle(event).await;
            drop(permit);
        });
    }
}
